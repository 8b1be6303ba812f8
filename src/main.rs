use std::io::{self, Read, Write};
use std::num::NonZeroU32;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subsheet::{processor, serialiser};

const OUTPUT_STEM: &str = "output_with_subtitles";

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => (),
        Err(err) => {
            eprintln!("An error occurred: {}", err);
            for cause in err.chain().skip(1) {
                eprintln!("    {}", cause);
            }
            std::process::exit(1);
        }
    }
}

#[derive(ClapParser)]
#[command(about = "Convert SRT subtitles into timecoded rows of a spreadsheet template")]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "The SRT file to read from. If not supplied, the subtitles will be read from standard input.",
        default_value = "-"
    )]
    input: String,
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "The spreadsheet template. It must contain sheets named `raw` and `canvas`."
    )]
    template: String,
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "The file to write to. Defaults to output_with_subtitles.<ext>, using the template's extension. Use - for standard output."
    )]
    output: Option<String>,
    #[arg(
        short,
        long,
        value_name = "N",
        help = "Frame rate used to turn milliseconds into frames.",
        default_value_t = processor::DEFAULT_FPS
    )]
    fps: NonZeroU32,
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Also write the intermediate table of subtitles as CSV to the specified file."
    )]
    csv: Option<String>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Log more details. Repeat for even more."
    )]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "subsheet=info",
        1 => "subsheet=debug",
        _ => "subsheet=trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let data = if cli.input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(&cli.input)
            .context(format!("Failed to open input file: '{}'", cli.input))?
    };

    let template = std::fs::read(&cli.template)
        .context(format!("Failed to open template file: '{}'", cli.template))?;

    let opts = processor::ProcessOpts { fps: cli.fps };
    let conversion = processor::process(&data, template, &opts)
        .context(format!("Failed to convert '{}'", cli.input))?;
    if conversion.subs.is_empty() {
        warn!("No subtitles found in '{}'; the raw sheet will be left empty.", cli.input);
    }

    if let Some(csv_path) = cli.csv {
        serialiser::serialise(&conversion.subs, &csv_path)
            .context(format!("Failed to write CSV file: '{}'", csv_path))?;
    }

    let output = cli
        .output
        .unwrap_or_else(|| default_output(&cli.template));
    if output == "-" {
        io::stdout()
            .write_all(&conversion.workbook)
            .context("Failed to write to stdout")?;
    } else {
        std::fs::write(&output, &conversion.workbook)
            .context(format!("Failed to write output file: '{}'", output))?;
        info!(subtitles = conversion.subs.len(), "Wrote '{}'", output);
    }

    Ok(())
}

fn default_output(template: &str) -> String {
    let ext = Path::new(template)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("xlsx");
    format!("{}.{}", OUTPUT_STEM, ext)
}
