use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use argh::FromArgs;
use console::style;
use vpu_asm::{Code, Isa};

use crate::util::*;

mod util;

fn main() -> ExitCode {
    if let Err(e) = init_logger() {
        eprintln!("{e:?}");
        return ExitCode::FAILURE;
    }

    let ArgsOrVersion::<App>(app) = argh::from_env();
    let res = match app.cmd {
        Cmd::Build(cmd) => cmd.run(),
        Cmd::Isa(cmd) => cmd.run(),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn init_logger() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")
}

/// VPU Assembler
#[derive(FromArgs)]
struct App {
    #[argh(subcommand)]
    cmd: Cmd,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Cmd {
    Build(CmdBuild),
    Isa(CmdIsa),
}

/// Assembles a source file into a binary image
#[derive(FromArgs)]
#[argh(subcommand, name = "build")]
struct CmdBuild {
    /// path to the input file with assembly code
    #[argh(positional)]
    input: PathBuf,
    /// path to the ISA description (defaults to `instructions.json`)
    #[argh(option, default = "PathBuf::from(DEFAULT_ISA_FILE)")]
    isa: PathBuf,
    /// optional path to the output file
    #[argh(option, short = 'o')]
    out: Option<PathBuf>,
    /// output build info as JSON
    #[argh(switch)]
    json: bool,
}

impl CmdBuild {
    fn run(self) -> Result<()> {
        let isa = load_isa(&self.isa)?;

        let code = std::fs::read_to_string(&self.input).with_context(|| {
            format!(
                "Failed to read assembly code from `{}`",
                self.input.display()
            )
        })?;

        let out = match self.out {
            Some(path) => path,
            None => {
                let mut out = self.input.clone();
                out.set_extension("bin");
                out
            }
        };
        anyhow::ensure!(self.input != out, "Output file must not be an input file");

        let program = match Code::new(&self.input, &code).build(&isa) {
            Ok(program) => program,
            Err(e) => {
                for diagnostic in e.diagnostics() {
                    eprintln!("{diagnostic}\n");
                }
                eprintln!("{}", style(&e).red().bold());
                anyhow::bail!("Build failed");
            }
        };

        let bytes = program.to_bytes();
        let mut file = std::fs::File::create(&out)
            .with_context(|| format!("Failed to open output file `{}`", out.display()))?;
        file.write_all(&bytes)
            .context("Failed to write the program")?;

        // The sentinel word is not an instruction
        let instructions = program.words().len() - 1;

        if !self.json && std::io::stdin().is_terminal() {
            eprintln!(
                "Output path:\t{}\n\
                Instructions:\t{}\n\
                Labels:\t\t{}\n\
                Size:\t\t{} bytes",
                out.display(),
                instructions,
                program.labels().count(),
                bytes.len(),
            );
        } else {
            let output = serde_json::to_string_pretty(&serde_json::json!({
                "output_path": out.display().to_string(),
                "instructions": instructions,
                "labels": program.labels().count(),
                "size": bytes.len(),
            }))?;
            println!("{output}");
        }
        Ok(())
    }
}

/// Validates an ISA description and prints the instruction catalog as JSON
#[derive(FromArgs)]
#[argh(subcommand, name = "isa")]
struct CmdIsa {
    /// path to the ISA description (defaults to `instructions.json`)
    #[argh(option, default = "PathBuf::from(DEFAULT_ISA_FILE)")]
    isa: PathBuf,
}

impl CmdIsa {
    fn run(self) -> Result<()> {
        let isa = load_isa(&self.isa)?;
        let output = serde_json::to_string_pretty(&catalog_json(&isa))?;
        println!("{output}");
        Ok(())
    }
}

fn catalog_json(isa: &Isa) -> serde_json::Value {
    let instructions = isa
        .instructions()
        .map(|instr| {
            serde_json::json!({
                "name": instr.name(),
                "internal_name": instr.internal_name(),
                "opcode": instr.opcode(),
                "operands": instr
                    .operands()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>(),
                "flags": instr.flags(),
                "desc": instr.description(),
            })
        })
        .collect::<Vec<_>>();

    let flags = isa
        .flags()
        .iter()
        .map(|flag| serde_json::json!({ "flag": flag.flag, "name": flag.name }))
        .collect::<Vec<_>>();

    let pipes = isa
        .pipes()
        .iter()
        .map(|pipe| {
            serde_json::json!({
                "name": pipe.name(),
                "prefix": pipe.prefix(),
                "opcodes": { "start": pipe.opcodes().start, "end": pipe.opcodes().end },
            })
        })
        .collect::<Vec<_>>();

    serde_json::json!({
        "registers": isa.registers(),
        "flags": flags,
        "instructions": instructions,
        "pipes": pipes,
    })
}
