use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::{imageops, GrayImage};
use seek_core::{FlatFieldAccumulator, Frame};
use seek_hw::{model_by_name, supported_models, CameraConfig, SeekCam, Transport};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "seek", about = "Seek Thermal camera tool")]
struct Cli {
    /// Camera model: seek or seekpro
    #[arg(short, long, global = true, default_value = "seek")]
    model: String,

    /// TOML camera configuration (SEEK_* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Replay recorded frame_N.png files from this directory instead of USB
    #[arg(long, global = true)]
    replay: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported camera models
    Models,
    /// Open the camera and print per-frame statistics
    Test {
        /// Number of frames to read
        #[arg(short = 'n', long, default_value_t = 10)]
        frames: usize,
        /// One JSON object per frame
        #[arg(long)]
        json: bool,
    },
    /// Capture one averaged frame to a PNG
    Snapshot {
        /// Output file
        #[arg(short, long, default_value = "output.png")]
        output: PathBuf,
        /// Frames to discard before sampling
        #[arg(short, long, default_value_t = 10)]
        warmup: usize,
        /// Frames to average
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        smoothing: u32,
        /// Clockwise rotation in degrees
        #[arg(short, long, default_value_t = 270, value_parser = parse_rotation)]
        rotate: u16,
        /// Write the corrected 16-bit samples instead of a stretched 8-bit image
        #[arg(long)]
        raw: bool,
    },
    /// Average frames into a 16-bit flat-field image
    CreateFlatField {
        /// Output file
        output: PathBuf,
        /// Frames to average
        #[arg(short, long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
        smoothing: u32,
    },
}

#[derive(Serialize)]
struct FrameStats {
    index: usize,
    counter: u16,
    device_temp: u16,
    min: u16,
    max: u16,
    mean: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Models = cli.command {
        for model in supported_models() {
            let id = model.usb_id();
            let (width, height) = model.geometry().visible_size();
            println!(
                "{:<8} {:04x}:{:04x}  {width}x{height}  {}",
                model.name(),
                id.vendor,
                id.product,
                model.description()
            );
        }
        return Ok(());
    }

    let config = config_for(&cli.command, load_config(cli.config.as_deref())?);
    let Some(model) = model_by_name(&cli.model) else {
        bail!("unknown camera model {:?} (see `seek models`)", cli.model);
    };

    match &cli.replay {
        Some(dir) => run(SeekCam::replay(model, dir, config), &cli.command),
        None => run(SeekCam::usb(model, config), &cli.command),
    }
}

fn load_config(path: Option<&Path>) -> Result<CameraConfig> {
    let config = match path {
        Some(path) => CameraConfig::load(path)?,
        None => CameraConfig::default(),
    };
    Ok(config.with_env()?)
}

/// A new flat-field is captured from uncorrected frames.
fn config_for(command: &Commands, mut config: CameraConfig) -> CameraConfig {
    if matches!(command, Commands::CreateFlatField { .. }) {
        if let Some(path) = config.flat_field.take() {
            tracing::info!(path = %path.display(), "ignoring configured flat-field");
        }
    }
    config
}

fn run<T: Transport>(mut cam: SeekCam<T>, command: &Commands) -> Result<()> {
    cam.open()
        .with_context(|| format!("failed to open {} camera", cam.model().name()))?;

    match command {
        Commands::Models => {}
        Commands::Test { frames, json } => run_test(&mut cam, *frames, *json)?,
        Commands::Snapshot {
            output,
            warmup,
            smoothing,
            rotate,
            raw,
        } => {
            for _ in 0..*warmup {
                cam.grab().context("warmup failed")?;
            }
            tracing::info!(frames = warmup, "warmup complete");
            let frame = average(&mut cam, *smoothing)?;
            if *raw {
                save_u16(&frame, output)?;
            } else {
                let gray = frame.to_gray8().context("frame too large to encode")?;
                rotate_image(gray, *rotate)
                    .save(output)
                    .with_context(|| format!("failed to write {}", output.display()))?;
            }
            println!("wrote {}", output.display());
        }
        Commands::CreateFlatField { output, smoothing } => {
            let frame = average(&mut cam, *smoothing)?;
            save_u16(&frame, output)?;
            println!("wrote flat-field {} from {smoothing} frames", output.display());
        }
    }

    cam.close();
    Ok(())
}

fn run_test<T: Transport>(cam: &mut SeekCam<T>, frames: usize, json: bool) -> Result<()> {
    let mut frame = Frame::default();
    for index in 0..frames {
        cam.read(&mut frame)
            .with_context(|| format!("no image after {index} frames"))?;
        let (min, max) = frame.min_max().unwrap_or_default();
        let stats = FrameStats {
            index,
            counter: cam.frame_counter(),
            device_temp: cam.device_temp_sensor(),
            min,
            max,
            mean: frame.mean(),
        };
        if json {
            println!("{}", serde_json::to_string(&stats)?);
        } else {
            println!(
                "frame {:>4}  counter {:>5}  temp {:>5}  min {:>5}  max {:>5}  mean {:>8.1}",
                stats.index, stats.counter, stats.device_temp, stats.min, stats.max, stats.mean
            );
        }
    }
    Ok(())
}

/// Read `count` frames and return their rounded per-pixel mean.
fn average<T: Transport>(cam: &mut SeekCam<T>, count: u32) -> Result<Frame> {
    let (width, height) = cam.visible_size();
    let mut acc = FlatFieldAccumulator::new(width, height);
    let mut frame = Frame::default();
    for _ in 0..count {
        cam.read(&mut frame).context("frame acquisition failed")?;
        acc.add(&frame)?;
    }
    acc.mean().context("no frames averaged")
}

fn save_u16(frame: &Frame, path: &Path) -> Result<()> {
    frame
        .to_image()
        .context("frame too large to encode")?
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn parse_rotation(s: &str) -> Result<u16, String> {
    match s.parse::<u16>() {
        Ok(deg @ (0 | 90 | 180 | 270)) => Ok(deg),
        _ => Err(format!("rotation must be 0, 90, 180 or 270, got {s}")),
    }
}

fn rotate_image(image: GrayImage, degrees: u16) -> GrayImage {
    match degrees {
        90 => imageops::rotate90(&image),
        180 => imageops::rotate180(&image),
        270 => imageops::rotate270(&image),
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};
    use seek_hw::{CameraModel, ReplayTransport, SeekThermal};

    type Gray16 = ImageBuffer<Luma<u16>, Vec<u16>>;

    fn write_raw(dir: &Path, index: usize, tag: u16, fill: u16) {
        let g = SeekThermal.geometry();
        let mut image = Gray16::from_pixel(g.raw_width() as u32, g.raw_height() as u32, Luma([fill]));
        image.put_pixel(10, 0, Luma([tag]));
        image.save(ReplayTransport::frame_path(dir, index)).unwrap();
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_snapshot_defaults() {
        let cli = Cli::parse_from(["seek", "snapshot"]);
        assert_eq!(cli.model, "seek");
        match cli.command {
            Commands::Snapshot {
                output,
                warmup,
                smoothing,
                rotate,
                raw,
            } => {
                assert_eq!(output, PathBuf::from("output.png"));
                assert_eq!((warmup, smoothing, rotate, raw), (10, 1, 270, false));
            }
            _ => panic!("expected snapshot"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["seek", "test", "--json", "--model", "seekpro", "--replay", "rec"]);
        assert_eq!(cli.model, "seekpro");
        assert_eq!(cli.replay, Some(PathBuf::from("rec")));
        assert!(matches!(cli.command, Commands::Test { frames: 10, json: true }));
    }

    #[test]
    fn test_create_flat_field_defaults() {
        let cli = Cli::parse_from(["seek", "create-flat-field", "ffc.png"]);
        assert!(matches!(
            cli.command,
            Commands::CreateFlatField { smoothing: 100, .. }
        ));
    }

    #[test]
    fn test_rotation_validation() {
        assert_eq!(parse_rotation("90"), Ok(90));
        assert!(parse_rotation("45").is_err());
        assert!(Cli::try_parse_from(["seek", "snapshot", "--rotate", "45"]).is_err());
        assert!(Cli::try_parse_from(["seek", "snapshot", "--smoothing", "0"]).is_err());
    }

    #[test]
    fn test_rotate_image_dimensions() {
        let image = GrayImage::from_pixel(4, 2, Luma([1]));
        assert_eq!(rotate_image(image.clone(), 0).dimensions(), (4, 2));
        assert_eq!(rotate_image(image.clone(), 90).dimensions(), (2, 4));
        assert_eq!(rotate_image(image.clone(), 180).dimensions(), (4, 2));
        assert_eq!(rotate_image(image, 270).dimensions(), (2, 4));
    }

    #[test]
    fn test_rotate_270_is_counter_clockwise() {
        let mut image = GrayImage::new(2, 1);
        image.put_pixel(1, 0, Luma([9]));
        let rotated = rotate_image(image, 270);
        // Right end of the row ends up on top.
        assert_eq!(rotated.get_pixel(0, 0), &Luma([9]));
    }

    #[test]
    fn test_stats_json_shape() {
        let stats = FrameStats {
            index: 2,
            counter: 40,
            device_temp: 600,
            min: 1,
            max: 9,
            mean: 4.5,
        };
        let value: serde_json::Value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["device_temp"], 600);
        assert_eq!(value["mean"], 4.5);
    }

    #[test]
    fn test_config_for_keeps_flat_field_outside_create() {
        let config = CameraConfig {
            flat_field: Some(PathBuf::from("ffc.png")),
            ..CameraConfig::default()
        };
        let cli = Cli::parse_from(["seek", "snapshot"]);
        assert!(config_for(&cli.command, config).flat_field.is_some());
    }

    #[test]
    fn test_create_flat_field_ignores_configured_flat_field() {
        let rec = tempfile::tempdir().unwrap();
        write_raw(rec.path(), 0, 4, 100);
        write_raw(rec.path(), 1, 1, 0x1000);
        write_raw(rec.path(), 2, 3, 0x1000);
        write_raw(rec.path(), 3, 3, 0x1000);

        let work = tempfile::tempdir().unwrap();
        let old_ffc = work.path().join("old.png");
        Gray16::from_pixel(207, 154, Luma([0x4100])).save(&old_ffc).unwrap();
        let output = work.path().join("new.png");

        let cli = Cli::parse_from(["seek", "create-flat-field", output.to_str().unwrap(), "-s", "1"]);
        let config = CameraConfig {
            flat_field: Some(old_ffc),
            ..CameraConfig::default()
        };
        let config = config_for(&cli.command, config);
        assert!(config.flat_field.is_none());

        run(SeekCam::replay(Box::new(SeekThermal), rec.path(), config), &cli.command).unwrap();

        let written = image::open(&output).unwrap().into_luma16();
        assert_eq!(written.dimensions(), (207, 154));
        assert!(written.pixels().all(|p| p.0[0] == 0x4000));
    }
}
