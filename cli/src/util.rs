use std::path::Path;

use anyhow::{Context, Result};
use vpu_asm::Isa;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_ISA_FILE: &str = "instructions.json";

/// Reads an ISA description from a JSON file and builds the catalog.
pub fn load_isa(path: &Path) -> Result<Isa> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ISA description from `{}`", path.display()))?;
    let data: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse ISA description `{}`", path.display()))?;
    let isa = Isa::from_value(&data)
        .with_context(|| format!("Invalid ISA description `{}`", path.display()))?;
    Ok(isa)
}

pub struct ArgsOrVersion<T>(pub T);

impl<T: argh::FromArgs> argh::TopLevelCommand for ArgsOrVersion<T> {}

impl<T: argh::FromArgs> argh::FromArgs for ArgsOrVersion<T> {
    fn from_args(command_name: &[&str], args: &[&str]) -> Result<Self, argh::EarlyExit> {
        /// Also use argh for catching `--version`-only invocations
        #[derive(Debug, argh::FromArgs)]
        struct Version {
            /// print version information and exit
            #[argh(switch, short = 'v')]
            pub version: bool,
        }

        match Version::from_args(command_name, args) {
            Ok(v) if v.version => Err(argh::EarlyExit {
                output: format!("{} {}", command_name.first().unwrap_or(&""), VERSION),
                status: Ok(()),
            }),
            Err(exit) if exit.status.is_ok() => {
                let help = match T::from_args(command_name, &["--help"]) {
                    Ok(_) => unreachable!(),
                    Err(exit) => exit.output,
                };
                Err(argh::EarlyExit {
                    output: format!("{help}  -v, --version     print version information and exit"),
                    status: Ok(()),
                })
            }
            _ => T::from_args(command_name, args).map(|app| Self(app)),
        }
    }
}
