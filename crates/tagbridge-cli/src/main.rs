//! tagbridge CLI — inspect the host and drive the tag engine.
//!
//! Commands:
//!   tagbridge detect                        Host capability descriptor
//!   tagbridge select                        Backend the loader would pick
//!   tagbridge sniff <file>                  Container format from magic bytes
//!   tagbridge read <file>                   All tags, pictures, ratings, audio properties
//!   tagbridge get <file> <KEY>              One property
//!   tagbridge set <file> <KEY> <value>      Set a property and save (--out <file> to write elsewhere)
//!   tagbridge version                       Engine version
//!   tagbridge metrics                       Load metrics
//!
//! Options come from `TAGBRIDGE_*` variables unless `--config <json>` is given.

use std::process::ExitCode;

use serde_json::json;
use tagbridge_core::adapter::sniff::sniff;
use tagbridge_core::{FileHandle, LoaderOptions, UnifiedModule};

fn main() -> ExitCode {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config = take_flag(&mut args, "--config");
    if args.is_empty() {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let options = match config {
        Some(path) => match read_config(&path) {
            Ok(options) => options,
            Err(e) => {
                eprintln!("bad config {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => LoaderOptions::from_env(),
    };

    let result = match args[0].as_str() {
        "detect" => cmd_detect(),
        "select" => cmd_select(&options),
        "sniff" => cmd_sniff(&args[1..]),
        "read" => cmd_read(&options, &args[1..]),
        "get" => cmd_get(&options, &args[1..]),
        "set" => cmd_set(&options, &mut args[1..].to_vec()),
        "version" => cmd_version(&options),
        "metrics" => cmd_metrics(&options),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

type CmdResult = Result<(), String>;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_detect() -> CmdResult {
    print_json(&tagbridge_core::detect())
}

fn cmd_select(options: &LoaderOptions) -> CmdResult {
    let descriptor = tagbridge_core::detect();
    let choice = tagbridge_core::select(&descriptor, options);
    print_json(&json!({
        "backend": choice,
        "environment": descriptor.environment,
        "forced": options.forced_backend.is_some(),
    }))
}

fn cmd_sniff(args: &[String]) -> CmdResult {
    let file = args.first().ok_or("usage: tagbridge sniff <file>")?;
    let bytes = std::fs::read(file).map_err(|e| format!("cannot read {}: {}", file, e))?;
    println!("{}", sniff(&bytes));
    Ok(())
}

fn cmd_read(options: &LoaderOptions, args: &[String]) -> CmdResult {
    let file = args.first().ok_or("usage: tagbridge read <file>")?;
    let module = load(options)?;
    let mut handle = open(&module, file)?;

    let out = (|| {
        Ok::<_, tagbridge_core::AdapterError>(json!({
            "format": handle.format()?,
            "properties": handle.properties()?,
            "pictures": handle.pictures()?.len(),
            "ratings": handle.ratings()?,
            "audio": handle.audio_properties()?,
        }))
    })()
    .map_err(|e| e.to_string());
    finish(&mut handle);
    print_json(&out?)
}

fn cmd_get(options: &LoaderOptions, args: &[String]) -> CmdResult {
    if args.len() < 2 {
        return Err("usage: tagbridge get <file> <KEY>".into());
    }
    let module = load(options)?;
    let mut handle = open(&module, &args[0])?;
    let value = handle.property(&args[1]).map_err(|e| e.to_string());
    finish(&mut handle);
    match value? {
        Some(v) => println!("{}", v),
        None => println!("(none)"),
    }
    Ok(())
}

fn cmd_set(options: &LoaderOptions, args: &mut Vec<String>) -> CmdResult {
    let out = take_flag(args, "--out");
    if args.len() < 3 {
        return Err("usage: tagbridge set <file> <KEY> <value> [--out <file>]".into());
    }
    let module = load(options)?;
    let mut handle = open(&module, &args[0])?;

    let saved = handle
        .set_property(&args[1], &args[2])
        .and_then(|_| handle.save())
        .and_then(|saved| Ok((saved, handle.buffer()?)))
        .map_err(|e| e.to_string());
    finish(&mut handle);

    let (saved, buffer) = saved?;
    if !saved {
        return Err(format!("engine did not accept {}", args[0]));
    }
    let target = out.unwrap_or_else(|| args[0].clone());
    std::fs::write(&target, &buffer[..]).map_err(|e| format!("cannot write {}: {}", target, e))?;
    println!("wrote {} ({} bytes)", target, buffer.len());
    Ok(())
}

fn cmd_version(options: &LoaderOptions) -> CmdResult {
    let module = load(options)?;
    let version = module.version().map_err(|e| e.to_string())?;
    println!("{} ({} on {})", version, module.backend_choice(), module.runtime());
    Ok(())
}

fn cmd_metrics(options: &LoaderOptions) -> CmdResult {
    let module = load(options)?;
    match module.metrics() {
        Some(metrics) => print_json(&metrics),
        None => {
            println!("metrics collection disabled");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load(options: &LoaderOptions) -> Result<UnifiedModule, String> {
    tagbridge_core::load(options).map_err(|e| {
        for attempt in &e.attempts {
            log::debug!("tagbridge: {} failed: {}", attempt.strategy, attempt.error);
        }
        e.to_string()
    })
}

fn open(module: &UnifiedModule, file: &str) -> Result<FileHandle, String> {
    let bytes = std::fs::read(file).map_err(|e| format!("cannot read {}: {}", file, e))?;
    let mut handle = module.create_file_handle().map_err(|e| e.to_string())?;
    match handle.load_from_buffer(bytes) {
        Ok(true) => Ok(handle),
        Ok(false) => {
            finish(&mut handle);
            Err(format!("engine rejected {}", file))
        }
        Err(e) => {
            finish(&mut handle);
            Err(e.to_string())
        }
    }
}

fn finish(handle: &mut FileHandle) {
    if let Err(e) = handle.destroy() {
        log::warn!("tagbridge: destroy failed: {}", e);
    }
}

fn read_config(path: &str) -> Result<LoaderOptions, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    LoaderOptions::from_json(&text).map_err(|e| e.to_string())
}

/// Remove `--name <value>` from `args`, returning the value.
fn take_flag(args: &mut Vec<String>, name: &str) -> Option<String> {
    let at = args.iter().position(|a| a == name)?;
    args.remove(at);
    if at < args.len() {
        Some(args.remove(at))
    } else {
        None
    }
}

fn print_json(value: &impl serde::Serialize) -> CmdResult {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

fn print_usage() {
    println!("tagbridge - tag engine loader");
    println!();
    println!("usage: tagbridge [--config <file.json>] <command> [args]");
    println!();
    println!("commands:");
    println!("  detect                       Host capability descriptor");
    println!("  select                       Backend the loader would pick");
    println!("  sniff <file>                 Container format from magic bytes");
    println!("  read <file>                  All tag data as JSON");
    println!("  get <file> <KEY>             One property");
    println!("  set <file> <KEY> <value>     Set a property and save [--out <file>]");
    println!("  version                      Engine version");
    println!("  metrics                      Load metrics");
}
