use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about = "Reports Midea dehumidifier readings to InfluxDB and/or MQTT")]
pub struct Args {
    /// Configuration JSON file. Defaults to /config.json or ./config.json.
    #[arg(long, env = "MIDEA_ENVIRONMENTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}
