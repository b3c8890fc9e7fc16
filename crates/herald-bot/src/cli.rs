use std::path::PathBuf;

use clap::Parser;
use herald_session::CliOverrides;

#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Herald - chat bot session supervisor")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Pair with a linking code instead of scanning a QR code
    #[arg(long)]
    pub pairing_code: bool,

    /// Use the mobile connection style
    #[arg(long)]
    pub mobile: bool,

    /// Owner phone number in international format (overrides HERALD_OWNER_NUMBER)
    #[arg(long, value_name = "NUMBER")]
    pub phone: Option<String>,

    /// Directory for the store snapshot and credentials (overrides HERALD_DATA_DIR)
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            pairing_code: self.pairing_code,
            mobile: self.mobile,
            phone: self.phone.clone(),
            data_dir: self.data_dir.clone(),
        }
    }
}
