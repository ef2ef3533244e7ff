//! Section file inspector - prints a container header without decoding the payload.
//!
//! Usage: cargo run --bin inspect_lod -- [OPTIONS]
//!
//! Options:
//!   --file <PATH>      Container file to inspect
//!   --dir <DIR>        Data directory (used with --pos)
//!   --pos <[d,x,z]>    Section position inside --dir
//!   --json             Print the header as JSON

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde_json::json;

use lodstore::core::Result;
use lodstore::data::GenerationStep;
use lodstore::math::SectionPos;
use lodstore::streaming::container::{self, ContainerHeader, HEADER_LEN};
use lodstore::streaming::section_path;

fn main() -> ExitCode {
    lodstore::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let path = match resolve_path(&args) {
        Ok(Some(path)) => path,
        Ok(None) => {
            eprintln!("usage: inspect_lod (--file <path> | --dir <dir> --pos [d,x,z]) [--json]");
            return ExitCode::from(2);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(2);
        }
    };

    match inspect(&path, args.iter().any(|a| a == "--json")) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("cannot inspect {}: {}", path.display(), err);
            ExitCode::FAILURE
        }
    }
}

fn resolve_path(args: &[String]) -> Result<Option<PathBuf>> {
    if let Some(file) = parse_str_arg(args, "--file") {
        return Ok(Some(PathBuf::from(file)));
    }
    let (Some(dir), Some(pos)) = (parse_str_arg(args, "--dir"), parse_str_arg(args, "--pos")) else {
        return Ok(None);
    };
    let pos: SectionPos = pos.parse()?;
    Ok(Some(section_path(Path::new(&dir), pos)))
}

fn inspect(path: &Path, as_json: bool) -> Result<()> {
    let header = container::read_header(path)?;
    let file_len = std::fs::metadata(path)?.len();
    let payload_len = file_len.saturating_sub(HEADER_LEN as u64);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&header_json(&header, payload_len))?);
        return Ok(());
    }

    let step = GenerationStep::from_u8(header.generation_step)
        .map(|s| format!("{:?}", s))
        .unwrap_or_else(|| format!("unknown ({})", header.generation_step));
    println!("=== {} ===", path.display());
    println!("Position:     {}", header.pos);
    println!("Data detail:  {}", header.data_detail);
    println!("Step:         {}", step);
    println!("Payload:      type {} v{}", header.payload_type, header.payload_version);
    println!("Data version: {}", header.data_version);
    println!("Compression:  {:?}", header.compression);
    println!("Checksum:     {:#010x}", header.checksum);
    println!("Payload size: {} bytes", payload_len);
    Ok(())
}

fn header_json(header: &ContainerHeader, payload_len: u64) -> serde_json::Value {
    json!({
        "pos": header.pos.serialize(),
        "data_detail": header.data_detail,
        "generation_step": header.generation_step,
        "payload_type": header.payload_type,
        "payload_version": header.payload_version,
        "data_version": header.data_version,
        "compression": header.compression,
        "checksum": header.checksum,
        "payload_bytes": payload_len,
    })
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
