use clap::{Parser, Subcommand};
use cuticle::request::DEFAULT_CONTEXT;
use cuticle::{ThumbnailGenerator, config, output};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cuticle")]
#[command(about = "Fast, memory-bounded thumbnail generator")]
#[command(long_about = "\
Fast, memory-bounded thumbnail generator

Each source is shrunk while it is decoded (JPEG), block-averaged by a whole
factor, then resized by the small remaining fraction with the chosen
interpolator. Large sources never need to fit in memory at full size.

Size strings:
  128        fit within 128x128, never enlarging
  200x100    fit within 200x100
  200x100^   fill 200x100, enlarging small sources (combine with --crop)

Output templates:
  tn_%s.jpg            photos/cat.png → photos/tn_cat.jpg
  /tmp/thumbs/%s.png   photos/cat.png → /tmp/thumbs/cat.png

Defaults come from ./cuticle.toml when present; flags override it.
Run 'cuticle gen-config' to generate a documented cuticle.toml.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Make a thumbnail of each file
    Thumbnail(ThumbnailArgs),
    /// Print a stock cuticle.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct ThumbnailArgs {
    /// Source images
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Thumbnail size: WIDTH[xHEIGHT][^]
    #[arg(short, long)]
    size: Option<String>,

    /// Output template, %s is the source name without extension
    #[arg(short, long)]
    output: Option<String>,

    /// Resampling interpolator: nearest, bilinear, bicubic, lanczos3
    #[arg(short = 'p', long)]
    interpolator: Option<String>,

    /// Sharpening: none, mild, or a matrix file
    #[arg(short = 'r', long)]
    sharpen: Option<String>,

    /// Export to this profile: srgb or an ICC file
    #[arg(short, long)]
    eprofile: Option<String>,

    /// Import profile for sources without an embedded one
    #[arg(short, long)]
    iprofile: Option<String>,

    /// Tag appended to the log context
    #[arg(short = 'x', long)]
    context: Option<String>,

    /// Process in linear light
    #[arg(short = 'a', long)]
    linear: bool,

    /// Crop to exactly the requested size
    #[arg(short, long)]
    crop: bool,

    /// Auto-rotate from the EXIF orientation
    #[arg(short = 't', long)]
    rotate: bool,

    /// Remove the colour profile from the thumbnail
    #[arg(short, long)]
    delete: bool,

    /// Log each stage decision
    #[arg(short, long)]
    verbose: bool,

    /// Config file
    #[arg(long, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,
}

impl ThumbnailArgs {
    /// Lay CLI values over the loaded config.
    fn apply(&self, thumbnail: &mut config::ThumbnailConfig) {
        let strings = [
            (&self.size, &mut thumbnail.size),
            (&self.output, &mut thumbnail.output),
            (&self.interpolator, &mut thumbnail.interpolator),
            (&self.sharpen, &mut thumbnail.sharpen),
        ];
        for (flag, value) in strings {
            if let Some(flag) = flag {
                *value = flag.clone();
            }
        }
        if self.eprofile.is_some() {
            thumbnail.export_profile = self.eprofile.clone();
        }
        if self.iprofile.is_some() {
            thumbnail.import_profile = self.iprofile.clone();
        }
        thumbnail.linear |= self.linear;
        thumbnail.crop |= self.crop;
        thumbnail.rotate |= self.rotate;
        thumbnail.delete_profile |= self.delete;
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Thumbnail(args) => {
            init_tracing(args.verbose);

            let mut config = config::load_config(&args.config)?;
            args.apply(&mut config.thumbnail);
            config.validate()?;
            init_thread_pool(&config.processing);

            let mut request = config.thumbnail.to_request()?;
            if let Some(tag) = &args.context {
                request.context = format!("{DEFAULT_CONTEXT} {tag}");
            }

            let results = ThumbnailGenerator::default().generate_batch(&args.files, &request);
            if args.json {
                let report = output::BatchReport::new(&results);
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_batch(&results);
            }

            if results.iter().any(|r| r.is_err()) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// `RUST_LOG` wins; otherwise warnings only, or stage decisions with `--verbose`.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Size the global rayon pool from `[processing]`.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    rayon::ThreadPoolBuilder::new()
        .num_threads(processing.worker_threads())
        .build_global()
        .ok();
}
