//! `gbin` — thin CLI over the GBF library: inspect headers, walk the
//! dot-path tree, and preview one variable.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use gbf::header::Header;
use gbf::value::Value;
use gbf::{read_header_only, read_var, ReadOptions};

#[derive(Parser)]
#[command(name = "gbin", about = "Inspect GBF (GREDBIN) container files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the file's header.
    Header {
        file: PathBuf,
        #[arg(long)]
        raw: bool,
        #[arg(long)]
        validate: bool,
    },
    /// Print the dot-path tree of variables.
    Tree {
        file: PathBuf,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        max_depth: Option<usize>,
        #[arg(long)]
        details: bool,
        #[arg(long)]
        validate: bool,
    },
    /// Print a truncated preview of one variable (or the whole root).
    Show {
        file: PathBuf,
        var: Option<String>,
        #[arg(long, default_value_t = 20)]
        max_elems: usize,
        #[arg(long)]
        rows: Option<usize>,
        #[arg(long)]
        cols: Option<usize>,
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Header { file, raw, validate } => cmd_header(&file, raw, validate),
        Command::Tree {
            file,
            prefix,
            max_depth,
            details,
            validate,
        } => cmd_tree(&file, prefix.as_deref(), max_depth, details, validate),
        Command::Show {
            file,
            var,
            max_elems,
            rows,
            cols,
            validate,
        } => cmd_show(&file, var.as_deref(), max_elems, rows, cols, validate),
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Format(e)) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
        Err(CliError::Usage(msg)) => {
            eprintln!("usage error: {}", msg);
            ExitCode::from(2)
        }
    }
}

enum CliError {
    Format(gbf::GbfError),
    #[allow(dead_code)]
    Usage(String),
}

impl From<gbf::GbfError> for CliError {
    fn from(e: gbf::GbfError) -> Self {
        CliError::Format(e)
    }
}

fn cmd_header(file: &PathBuf, raw: bool, validate: bool) -> Result<(), CliError> {
    let (header, _header_len, raw_bytes) = read_header_only(file, ReadOptions { validate })?;
    if raw {
        println!("{}", String::from_utf8_lossy(&raw_bytes));
    } else {
        print_header_table(&header);
    }
    Ok(())
}

fn print_header_table(header: &Header) {
    println!(
        "format={} version={} endianness={} order={} payload_start={} file_size={} crc={}",
        header.format,
        header.version,
        header.endianness,
        header.order,
        header.payload_start,
        header.file_size,
        header.header_crc32_hex
    );
    println!("{:<28} {:<16} {:<10} {:>10} {:>10}", "name", "kind/class", "compress", "usize", "csize");
    for field in &header.fields {
        println!(
            "{:<28} {:<16} {:<10} {:>10} {:>10}",
            field.name,
            format!("{}/{}", field.kind, field.class),
            field.compression.as_str(),
            field.usize_,
            field.csize
        );
    }
}

fn cmd_tree(
    file: &PathBuf,
    prefix: Option<&str>,
    max_depth: Option<usize>,
    details: bool,
    validate: bool,
) -> Result<(), CliError> {
    let (header, _header_len, _raw) = read_header_only(file, ReadOptions { validate })?;
    for field in &header.fields {
        if let Some(p) = prefix {
            if field.name != p && !field.name.starts_with(&format!("{}.", p)) {
                continue;
            }
        }
        let depth = field.name.matches('.').count() + 1;
        if let Some(max) = max_depth {
            if depth > max {
                continue;
            }
        }
        if details {
            println!(
                "{} [{}/{} shape={:?} usize={}]",
                field.name, field.kind, field.class, field.shape, field.usize_
            );
        } else {
            println!("{}", field.name);
        }
    }
    Ok(())
}

fn cmd_show(
    file: &PathBuf,
    var: Option<&str>,
    max_elems: usize,
    _rows: Option<usize>,
    _cols: Option<usize>,
    validate: bool,
) -> Result<(), CliError> {
    let value = read_var(file, var.unwrap_or(""), ReadOptions { validate })?;
    print_value_preview(&value, max_elems);
    Ok(())
}

fn print_value_preview(value: &Value, max_elems: usize) {
    match value {
        Value::Struct(record) => {
            for (key, child) in record.iter() {
                println!("{}: {}", key, child.kind_name());
            }
        }
        Value::Numeric(v) => {
            let n = v.real_le.len() / v.class.bpe().max(1);
            println!(
                "numeric {} shape={:?} n={} (showing up to {})",
                v.class.name(),
                v.shape,
                n,
                max_elems.min(n)
            );
        }
        Value::String(v) => {
            for s in v.data.iter().take(max_elems) {
                match s {
                    Some(s) => println!("{:?}", s),
                    None => println!("<missing>"),
                }
            }
        }
        other => println!("{}", other.kind_name()),
    }
}
