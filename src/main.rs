//! slicer – command-line rendered HTML → sliced PDF exporter.
//!
//! Usage:
//!   slicer <input.html> [out-dir] [--name N] [--selector S] [--dpr F]
//!          [--width PX] [--font path.ttf] [--config cfg.json] [--strict]
//!
//! If `out-dir` is omitted the PDF is written next to the input file. The
//! file name defaults to the input's stem.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use pdf_slicer::fonts::FontManager;
use pdf_slicer::persist::FilePersister;
use pdf_slicer::{ExportConfig, ExportOptions, ExportOutcome, Exporter, LiveDocument};

const DEFAULT_VIEWPORT_WIDTH: f32 = 800.0;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut input_path: Option<PathBuf> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut name: Option<String> = None;
    let mut selector: Option<String> = None;
    let mut dpr: Option<f32> = None;
    let mut width = DEFAULT_VIEWPORT_WIDTH;
    let mut font_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut strict = false;
    let mut positional = 0usize;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--name" | "-n" => name = Some(flag_value(&mut iter, arg, &args[0])),
            "--selector" | "-s" => selector = Some(flag_value(&mut iter, arg, &args[0])),
            "--dpr" => dpr = Some(parse_number(&flag_value(&mut iter, arg, &args[0]), arg)),
            "--width" | "-w" => width = parse_number(&flag_value(&mut iter, arg, &args[0]), arg),
            "--font" => font_path = Some(PathBuf::from(flag_value(&mut iter, arg, &args[0]))),
            "--config" | "-c" => config_path = Some(PathBuf::from(flag_value(&mut iter, arg, &args[0]))),
            "--strict" => strict = true,
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown flag: {other}");
                print_usage(&args[0]);
                process::exit(1);
            }
            path => {
                if positional == 0 {
                    input_path = Some(PathBuf::from(path));
                } else if positional == 1 {
                    out_dir = Some(PathBuf::from(path));
                } else {
                    eprintln!("Unexpected argument: {path}");
                    print_usage(&args[0]);
                    process::exit(1);
                }
                positional += 1;
            }
        }
    }

    let input = match input_path {
        Some(p) => p,
        None => {
            eprintln!("Error: no input file specified.");
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    let mut config = match &config_path {
        Some(path) => {
            let json = read_or_exit(path);
            ExportConfig::from_json(&json).unwrap_or_else(|e| {
                eprintln!("Error in '{}': {e}", path.display());
                process::exit(1);
            })
        }
        None => ExportConfig::default(),
    };
    if let Some(selector) = selector {
        config.boundary_selector = selector;
    }
    if let Some(dpr) = dpr {
        config.device_pixel_ratio = dpr;
    }
    config.strict_resources |= strict;

    let mut fonts = FontManager::default();
    if let Some(path) = &font_path {
        let bytes = fs::read(path).unwrap_or_else(|e| {
            eprintln!("Error reading '{}': {e}", path.display());
            process::exit(1);
        });
        let family = path.file_stem().and_then(|s| s.to_str()).unwrap_or("Custom");
        if let Err(e) = fonts.load_font(family, false, false, bytes) {
            eprintln!("Error loading font '{}': {e}", path.display());
            process::exit(1);
        }
    }
    let fonts = Arc::new(fonts);

    // Default output: the directory of the input file.
    let out_dir = out_dir.unwrap_or_else(|| {
        input
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let name = name.unwrap_or_else(|| {
        input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    });

    let html = read_or_exit(&input);
    let mut document = LiveDocument::from_html(&html, width, fonts.clone());

    let exporter = match Exporter::with_layout_rasterizer(config, fonts, FilePersister::new(out_dir)) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    match exporter.export(&mut document, &ExportOptions::new(name)) {
        Ok(ExportOutcome::Saved(report)) => {
            eprintln!(
                "Wrote '{}' ({} page{} from {} slice{})",
                report.location,
                report.page_count,
                if report.page_count == 1 { "" } else { "s" },
                report.slice_count,
                if report.slice_count == 1 { "" } else { "s" },
            );
            if !report.failed_slices.is_empty() {
                eprintln!("Slices without a page: {:?}", report.failed_slices);
            }
        }
        Ok(ExportOutcome::Empty) => eprintln!("Nothing to export: the document has no elements."),
        Ok(ExportOutcome::NoPages { slice_count, .. }) => {
            eprintln!("No page could be captured from {slice_count} slice(s); no file written.");
        }
        Ok(ExportOutcome::PersistFailed { file_name, reason }) => {
            eprintln!("Error writing '{file_name}': {reason}");
            process::exit(1);
        }
        Ok(ExportOutcome::Busy) => eprintln!("Another export is already running."),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn flag_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str, prog: &str) -> String {
    match iter.next() {
        Some(v) => v.clone(),
        None => {
            eprintln!("Missing value for {flag}");
            print_usage(prog);
            process::exit(1);
        }
    }
}

fn parse_number(value: &str, flag: &str) -> f32 {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Invalid number for {flag}: {value:?}");
        process::exit(1);
    })
}

fn read_or_exit(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading '{}': {e}", path.display());
        process::exit(1);
    })
}

fn print_usage(prog: &str) {
    eprintln!("slicer – rendered HTML to sliced PDF exporter (pdf-slicer)");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {prog} <input.html> [out-dir] [--name N] [--selector S] [--dpr F]");
    eprintln!("         [--width PX] [--font path.ttf] [--config cfg.json] [--strict]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <input.html>   Rendered markdown; <body> children or one wrapping element are exported");
    eprintln!("  [out-dir]      Output directory (default: the input file's directory)");
    eprintln!();
    eprintln!("Flags:");
    eprintln!("  --name, -n     File name body (default: input filename stem)");
    eprintln!("  --selector, -s Elements allowed to start a page (default: top-level h1-h3)");
    eprintln!("  --dpr          Device pixel ratio (default: 1)");
    eprintln!("  --width, -w    Viewport width in CSS px (default: 800)");
    eprintln!("  --font         TTF/OTF used to draw text (without one, text is not painted)");
    eprintln!("  --config, -c   JSON export configuration");
    eprintln!("  --strict       Fail on images that are not data URIs");
    eprintln!("  --help         Print this message");
}
