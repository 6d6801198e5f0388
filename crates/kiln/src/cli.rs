//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use kiln::ImageConfig;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Retargetable backend - assembles and links programs into firmware images")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Log level for kiln crates (RUST_LOG overrides)
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Worker threads for parallel work (0 = one per CPU)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    pub jobs: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble AVR text and patch it into a template image
    Asm(AsmArgs),
    /// Check record syntax and checksums of hex files
    Verify {
        /// Hex files to check
        #[arg(value_name = "HEX", required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Show the free-code region and jump table of a template
    Info {
        /// Template hex file
        #[arg(value_name = "TEMPLATE")]
        template: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Recover the source embedded in a linked image
    Extract {
        /// Linked hex file
        #[arg(value_name = "HEX")]
        input: PathBuf,

        /// Where to write the source
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Template layout shared by commands that open a template.
#[derive(Args, Clone, Debug)]
pub struct LayoutArgs {
    /// Jump table symbol names, one per line, in table order
    #[arg(long, value_name = "FILE")]
    pub symbols: Option<PathBuf>,

    /// Jump table entries are 32-bit byte addresses
    #[arg(long)]
    pub long_pointers: bool,

    /// Code start alignment in bytes, a power of two
    #[arg(long, value_name = "BYTES", value_parser = parse_page_size)]
    pub page_size: Option<u32>,
}

impl LayoutArgs {
    pub fn image_config(&self) -> ImageConfig {
        let mut config = ImageConfig::default();
        if self.long_pointers {
            config = config.with_long_pointers();
        }
        if let Some(page) = self.page_size {
            config = config.with_page_size(page);
        }
        config
    }
}

#[derive(Args, Clone, Debug)]
pub struct AsmArgs {
    /// AVR assembly source
    #[arg(value_name = "ASM")]
    pub input: PathBuf,

    /// Template hex file
    #[arg(short, long)]
    pub template: PathBuf,

    /// Output hex file
    #[arg(short, long, default_value = "binary.hex")]
    pub output: PathBuf,

    #[command(flatten)]
    pub layout: LayoutArgs,

    /// Write only the records up to the end of the program
    #[arg(long)]
    pub short: bool,

    /// Also write quick-flash words to this file
    #[arg(long, value_name = "FILE")]
    pub quick_flash: Option<PathBuf>,

    /// Embed this file as compressed source after the program
    #[arg(long, value_name = "FILE")]
    pub embed: Option<PathBuf>,

    /// Global slots the firmware allocates
    #[arg(long, default_value = "0")]
    pub globals: u16,

    /// Header hash as 16 hex digits (default: hash of the template)
    #[arg(long, value_parser = parse_hash)]
    pub hash: Option<[u8; 8]>,
}

fn parse_hash(s: &str) -> Result<[u8; 8], String> {
    let s = s.trim_start_matches("0x");
    if s.len() != 16 {
        return Err(format!("expected 16 hex digits, got {}", s.len()));
    }
    let mut out = [0u8; 8];
    for (i, b) in out.iter_mut().enumerate() {
        *b = u8::from_str_radix(&s[2 * i..2 * i + 2], 16).map_err(|e| e.to_string())?;
    }
    Ok(out)
}

fn parse_page_size(s: &str) -> Result<u32, String> {
    let size = s
        .strip_prefix("0x")
        .map_or_else(|| s.parse(), |hex| u32::from_str_radix(hex, 16))
        .map_err(|e| e.to_string())?;
    if size.is_power_of_two() {
        Ok(size)
    } else {
        Err(format!("{size} is not a power of two"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `EnvFilter` directive covering every kiln crate.
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Error => "kiln=error",
            Self::Warn => "kiln=warn",
            Self::Info => "kiln=info",
            Self::Debug => "kiln=debug",
            Self::Trace => "kiln=trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hash() {
        assert_eq!(
            parse_hash("0x0102030405060708"),
            Ok([1, 2, 3, 4, 5, 6, 7, 8])
        );
        assert!(parse_hash("0102").is_err());
        assert!(parse_hash("zz02030405060708").is_err());
    }

    #[test]
    fn test_parse_page_size() {
        assert_eq!(parse_page_size("0x400"), Ok(0x400));
        assert_eq!(parse_page_size("256"), Ok(256));
        assert!(parse_page_size("0").is_err());
        assert!(parse_page_size("768").is_err());
        assert!(
            Cli::try_parse_from(["kiln", "info", "t.hex", "--page-size", "0"]).is_err()
        );
    }

    #[test]
    fn test_asm_flags() {
        let cli = Cli::parse_from([
            "kiln", "asm", "prog.s", "-t", "t.hex", "--short", "--long-pointers", "-j", "2",
        ]);
        assert_eq!(cli.jobs, 2);
        let Commands::Asm(args) = cli.command else {
            panic!("expected asm");
        };
        assert!(args.short);
        assert_eq!(args.output, PathBuf::from("binary.hex"));
        assert_eq!(args.layout.image_config().pointer_bytes, 4);
    }
}
