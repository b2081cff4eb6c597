use clap::{Parser, Subcommand};
use poepack::archive::Archive;
use poepack::codec::OodleCodec;
use regex::Regex;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "poepack", version, about = "Extract files from GGPK packs and bundle archives")]
struct Cli {
    /// Shared object providing the block decompressor
    #[arg(long, global = true, default_value = "libooz.so")]
    decompressor: PathBuf,
    /// Export name of the decompress function
    #[arg(long, global = true, default_value = "Ooz_Decompress")]
    export: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every logical file path in the archive, one per line
    ListFiles {
        /// A *.ggpk pack file or an install directory containing Bundles2
        root: PathBuf,
    },
    /// Extract files whose paths match the given patterns
    ExtractFiles {
        /// Treat patterns as regular expressions instead of exact paths
        #[arg(long)]
        regex: bool,
        /// A *.ggpk pack file or an install directory containing Bundles2
        root: PathBuf,
        output_dir: PathBuf,
        /// Patterns; read from standard input when none are given
        patterns: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let codec = OodleCodec::load(&cli.decompressor, Some(&cli.export))?;

    match cli.command {
        // ── List ─────────────────────────────────────────────────────────────
        Commands::ListFiles { root } => {
            let ar = Archive::open_root(&root, Box::new(codec))?;
            for path in ar.list_paths()? {
                println!("{path}");
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::ExtractFiles { regex, root, output_dir, patterns } => {
            let ar = Archive::open_root(&root, Box::new(codec))?;

            let patterns = if patterns.is_empty() {
                std::io::stdin().lock().lines().collect::<Result<Vec<_>, _>>()?
            } else {
                patterns
            };
            let wanted = if regex {
                match_paths(&ar, &patterns)?
            } else {
                patterns.iter().map(|p| unquote(p).to_owned()).collect()
            };

            let mut errors = 0usize;
            let mut extracted = 0usize;

            // Group wanted files by containing bundle so each bundle is
            // read and decompressed exactly once.
            let mut per_bundle: HashMap<u32, Vec<(String, u32, u32)>> = HashMap::new();
            for path in wanted {
                let Some(file_id) = ar.lookup_file(&path) else {
                    eprintln!("Could not find file \"{path}\"");
                    errors += 1;
                    continue;
                };
                let record = ar.index().files()[file_id as usize];
                per_bundle
                    .entry(record.bundle_index)
                    .or_default()
                    .push((path, record.offset, record.size));
            }

            for (bundle_id, parts) in per_bundle {
                let data = match ar.extract_bundle(bundle_id) {
                    Ok(data) => data,
                    Err(e) => {
                        eprintln!("Could not extract bundle {bundle_id}: {e}");
                        errors += parts.len();
                        continue;
                    }
                };
                for (path, offset, size) in parts {
                    let slice = &data[offset as usize..(offset + size) as usize];
                    match write_output(&output_dir, &path, slice) {
                        Ok(()) => extracted += 1,
                        Err(e) => {
                            eprintln!("Could not write \"{path}\": {e}");
                            errors += 1;
                        }
                    }
                }
            }

            eprintln!("Extracted {extracted} file(s), {errors} failure(s)");
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn unquote(pattern: &str) -> &str {
    pattern
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(pattern)
}

/// Regex mode: match every pattern against the full path catalogue.
fn match_paths(ar: &Archive, patterns: &[String]) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let regexes = patterns
        .iter()
        .map(|p| Regex::new(unquote(p)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ar
        .list_paths()?
        .into_iter()
        .filter(|path| regexes.iter().any(|re| re.is_match(path)))
        .collect())
}

fn write_output(output_dir: &Path, path: &str, data: &[u8]) -> std::io::Result<()> {
    let mut full = output_dir.to_path_buf();
    full.extend(path.split('/').filter(|c| !c.is_empty()));
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(full, data)
}
