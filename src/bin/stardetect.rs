use std::env;
use std::process;

use anyhow::{Context, Result};
use log::info;

use stardetect::catalog::write_catalog;
use stardetect::fits::load_fits_image;
use stardetect::render::{save_annotated_image, save_grayscale_image, RadiusMode, RenderConfig};
use stardetect::{detect, fitting_available, DetectConfig};

fn print_usage(program: &str) {
    eprintln!("Point-source detection for FITS images");
    eprintln!();
    eprintln!("Usage: {} <input.fits> [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --out <FILE>          CSV catalog output (default: detections.csv)");
    eprintln!("  --k <K>               Detection threshold in sigma (default: 3.0)");
    eprintln!("  --psf-sigma <S>       Expected PSF sigma in pixels (default: 1.2)");
    eprintln!("  --bg-block <N>        Background block size (default: 64)");
    eprintln!("  --min-area <N>        Minimum component area in pixels (default: 2)");
    eprintln!("  --no-matched-filter   Threshold the unfiltered image");
    eprintln!("  --no-fit              Skip Gaussian profile fitting");
    eprintln!("  --invert              Negate the image before detection");
    eprintln!("  --annotate <FILE>     Save a PNG with detection markers");
    eprintln!("  --radius-mode <MODE>  Marker radius: fixed | fit (default: fixed)");
    eprintln!("  --dump-filtered <FILE> Save the matched-filtered frame as a PNG");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} frame.fits", program);
    eprintln!("  {} frame.fits --k 4 --out stars.csv --annotate stars.png", program);
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        return Err(anyhow::anyhow!("Missing FITS input file"));
    }
    if args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        return Ok(());
    }

    let input_path = &args[1];
    let mut out_path = String::from("detections.csv");
    let mut config = DetectConfig::default().with_min_area(2);
    let mut annotate_path: Option<String> = None;
    let mut filtered_path: Option<String> = None;
    let mut radius_mode = RadiusMode::Fixed;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--out" => {
                out_path = take_value(&args, i, "--out")?.to_string();
                i += 2;
            }
            "--k" => {
                let k = take_value(&args, i, "--k")?
                    .parse::<f32>()
                    .context("Invalid --k value")?;
                config = config.with_k(k);
                i += 2;
            }
            "--psf-sigma" => {
                let sigma = take_value(&args, i, "--psf-sigma")?
                    .parse::<f32>()
                    .context("Invalid --psf-sigma value")?;
                if sigma <= 0.0 {
                    return Err(anyhow::anyhow!("--psf-sigma must be positive"));
                }
                config = config.with_psf_sigma(sigma);
                i += 2;
            }
            "--bg-block" => {
                let block = take_value(&args, i, "--bg-block")?
                    .parse::<usize>()
                    .context("Invalid --bg-block value")?;
                if block == 0 {
                    return Err(anyhow::anyhow!("--bg-block must be >= 1"));
                }
                config = config.with_bg_block_size(block);
                i += 2;
            }
            "--min-area" => {
                let area = take_value(&args, i, "--min-area")?
                    .parse::<usize>()
                    .context("Invalid --min-area value")?;
                config = config.with_min_area(area);
                i += 2;
            }
            "--no-matched-filter" => {
                config = config.without_matched_filter();
                i += 1;
            }
            "--no-fit" => {
                config = config.without_profile_fits();
                i += 1;
            }
            "--invert" => {
                config = config.with_invert(true);
                i += 1;
            }
            "--annotate" => {
                annotate_path = Some(take_value(&args, i, "--annotate")?.to_string());
                i += 2;
            }
            "--dump-filtered" => {
                filtered_path = Some(take_value(&args, i, "--dump-filtered")?.to_string());
                i += 2;
            }
            "--radius-mode" => {
                radius_mode = match take_value(&args, i, "--radius-mode")? {
                    "fixed" => RadiusMode::Fixed,
                    "fit" => RadiusMode::Fit,
                    other => {
                        return Err(anyhow::anyhow!("Unknown radius mode: {}", other));
                    }
                };
                i += 2;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown option: {}", other));
            }
        }
    }

    if config.fit_profiles && !fitting_available() {
        info!("profile fitting not compiled in; detections will carry no fits");
    }

    let image = load_fits_image(input_path)?;
    let (h, w) = image.dim();
    info!("loaded {} ({}x{})", input_path, w, h);

    let (detections, diagnostics) = detect(&image, &config)?;
    write_catalog(&out_path, &detections)?;
    println!("Saved {} detections to {}", detections.len(), out_path);

    if let Some(png_path) = annotate_path {
        let render_config = RenderConfig {
            radius_mode,
            circle_radius: 2.0 * config.psf_sigma,
        };
        save_annotated_image(&png_path, &image, &detections, &render_config)?;
        println!("Saved annotated image to {}", png_path);
    }
    if let Some(png_path) = filtered_path {
        save_grayscale_image(&png_path, &diagnostics.filtered)?;
        println!("Saved filtered image to {}", png_path);
    }

    Ok(())
}

fn take_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))
}
