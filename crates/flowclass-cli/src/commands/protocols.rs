//! Protocols command - protocol table listing

use anyhow::Result;
use clap::Args;
use flowclass_core::admin;
use flowclass_core::protocol::ProtocolTable;

/// Protocols command arguments
#[derive(Args, Debug)]
pub struct ProtocolsArgs {
    /// Also print the configuration key of each protocol
    #[arg(short, long)]
    pub keys: bool,
}

/// Execute protocols command
pub fn execute(args: &ProtocolsArgs) -> Result<()> {
    if args.keys {
        for info in ProtocolTable::iter() {
            println!("{},{},{}", info.id.0, info.name, info.key);
        }
    } else {
        print!("{}", admin::protocol_listing());
    }
    Ok(())
}
