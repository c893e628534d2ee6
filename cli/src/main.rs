use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use is_terminal::IsTerminal;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use vcf_tabix::rsid::RsidIndex;
use vcf_tabix::tabix::{IndexBuilder, TabixIndex};
use vcf_tabix::{BgzfReader, BgzfWriter, Compression, TabixIndexedFile};

#[derive(Debug, Parser)]
#[command(author, version, about = "Inspect and query BGZF/Tabix-indexed VCF files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compress a file with BGZF and build its Tabix index.
    Index {
        /// Plain-text VCF to compress and index.
        input: PathBuf,
        /// Path for the compressed output [default: <input>.gz]
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Path for the Tabix index [default: <output>.tbi]
        #[arg(short = 'I', long = "index-name")]
        index_name: Option<PathBuf>,
        /// Overwrite existing output files.
        #[arg(short = 'f', long = "force")]
        force: bool,
        /// Compression level to use; 0 to 9, or -1 for default [-1]
        #[arg(short = 'l', long = "compress-level", default_value = "-1")]
        compress_level: i32,
    },
    /// Print the raw decompressed bytes covering a region.
    Fetch {
        /// BGZF-compressed VCF.
        input: PathBuf,
        /// Tabix index [default: <input>.tbi]
        #[arg(short = 'I', long = "index-name")]
        index_name: Option<PathBuf>,
        sequence: String,
        begin: u64,
        end: u64,
    },
    /// Pretty-print the parsed VCF records covering a region.
    View {
        input: PathBuf,
        #[arg(short = 'I', long = "index-name")]
        index_name: Option<PathBuf>,
        sequence: String,
        begin: u64,
        end: u64,
    },
    /// Decompress a whole BGZF file to standard output.
    Cat {
        input: PathBuf,
        /// Write even when standard output is a terminal.
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
    /// Build or query the RSID secondary index.
    #[command(subcommand)]
    Rsid(RsidCommand),
}

#[derive(Debug, Subcommand)]
enum RsidCommand {
    /// Scan a BGZF VCF's ID column and write an RSID index.
    Build {
        input: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
    /// Look up a single rsid in a previously built RSID index.
    Lookup { index: PathBuf, rsid: String },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Index {
            input,
            output,
            index_name,
            force,
            compress_level,
        } => run_index(
            &input,
            output.as_deref(),
            index_name.as_deref(),
            force,
            compress_level,
        ),
        Command::Fetch {
            input,
            index_name,
            sequence,
            begin,
            end,
        } => run_fetch(&input, index_name.as_deref(), &sequence, begin, end),
        Command::View {
            input,
            index_name,
            sequence,
            begin,
            end,
        } => run_view(&input, index_name.as_deref(), &sequence, begin, end),
        Command::Cat { input, force } => run_cat(&input, force),
        Command::Rsid(RsidCommand::Build {
            input,
            output,
            force,
        }) => run_rsid_build(&input, output.as_deref(), force),
        Command::Rsid(RsidCommand::Lookup { index, rsid }) => run_rsid_lookup(&index, &rsid),
    }
}

fn default_index_path(input: &Path) -> PathBuf {
    let mut out = input.as_os_str().to_owned();
    out.push(".tbi");
    PathBuf::from(out)
}

fn open_index_for(input: &Path, index_name: Option<&Path>) -> anyhow::Result<TabixIndex> {
    let path = index_name
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_index_path(input));
    let file =
        File::open(&path).with_context(|| format!("failed to open index {}", path.display()))?;
    TabixIndex::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("failed to parse index {}", path.display()))
}

fn open_indexed(input: &Path, index_name: Option<&Path>) -> anyhow::Result<TabixIndexedFile<File>> {
    let index = open_index_for(input, index_name)?;
    let source =
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    Ok(TabixIndexedFile::new(source, index)?)
}

fn run_index(
    input: &Path,
    output: Option<&Path>,
    index_name: Option<&Path>,
    force: bool,
    compress_level: i32,
) -> anyhow::Result<()> {
    let compression = match compress_level {
        -1 => Compression::default(),
        i if (0..=9).contains(&i) => Compression::new(compress_level.try_into()?),
        _ => bail!("compression level must be -1 to 9"),
    };

    let default_output;
    let output_path = match output {
        Some(p) => p,
        None => {
            let mut p = input.as_os_str().to_owned();
            p.push(".gz");
            default_output = PathBuf::from(p);
            &default_output
        }
    };
    let index_path = index_name
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_index_path(output_path));

    if !force {
        if output_path.exists() {
            bail!(
                "{} already exists. Use -f to force overwrite.",
                output_path.display()
            );
        }
        if index_path.exists() {
            bail!(
                "{} already exists. Use -f to force overwrite.",
                index_path.display()
            );
        }
    }

    let mut input_file =
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let mut output_file = BufWriter::new(
        File::create(output_path)
            .with_context(|| format!("failed to create {}", output_path.display()))?,
    );
    {
        let mut writer = BgzfWriter::new(&mut output_file, compression);
        std::io::copy(&mut input_file, &mut writer).context("failed to compress input")?;
        writer.close()?;
    }
    output_file.flush()?;
    drop(output_file);

    let compressed = File::open(output_path)
        .with_context(|| format!("failed to reopen {}", output_path.display()))?;
    let index = IndexBuilder::build_from(compressed).context("failed to build tabix index")?;
    let index_file = BufWriter::new(
        File::create(&index_path)
            .with_context(|| format!("failed to create {}", index_path.display()))?,
    );
    index.write(index_file)?;

    log::info!(
        "wrote {} and {}",
        output_path.display(),
        index_path.display()
    );
    Ok(())
}

fn run_fetch(
    input: &Path,
    index_name: Option<&Path>,
    sequence: &str,
    begin: u64,
    end: u64,
) -> anyhow::Result<()> {
    let mut file = open_indexed(input, index_name)?;
    let bytes = file.fetch_bytes(sequence, begin, end)?;
    std::io::stdout().write_all(&bytes)?;
    Ok(())
}

fn run_view(
    input: &Path,
    index_name: Option<&Path>,
    sequence: &str,
    begin: u64,
    end: u64,
) -> anyhow::Result<()> {
    let mut file = open_indexed(input, index_name)?;
    let lines = file.fetch_vcf_lines(sequence, begin, end)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

fn run_cat(input: &Path, force: bool) -> anyhow::Result<()> {
    if std::io::stdout().is_terminal() && !force {
        bail!("decompressed data not written to a terminal. Use -f to force.");
    }
    let source =
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let mut reader = BgzfReader::new(source)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    std::io::copy(&mut reader, &mut out)?;
    Ok(())
}

fn run_rsid_build(input: &Path, output: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let default_output;
    let output_path = match output {
        Some(p) => p,
        None => {
            let mut p = input.as_os_str().to_owned();
            p.push(".rsi");
            default_output = PathBuf::from(p);
            &default_output
        }
    };
    if output_path.exists() && !force {
        bail!(
            "{} already exists. Use -f to force overwrite.",
            output_path.display()
        );
    }

    let source =
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let index = RsidIndex::build_from(source).context("failed to build rsid index")?;
    let sink = BufWriter::new(
        File::create(output_path)
            .with_context(|| format!("failed to create {}", output_path.display()))?,
    );
    index.write(sink)?;
    log::info!(
        "wrote {} entries to {}",
        index.len(),
        output_path.display()
    );
    Ok(())
}

fn run_rsid_lookup(index_path: &Path, rsid: &str) -> anyhow::Result<()> {
    let file = File::open(index_path)
        .with_context(|| format!("failed to open {}", index_path.display()))?;
    let index = RsidIndex::from_reader(file)?;
    match index.lookup(rsid) {
        Some((chrom, pos)) => println!("{}\t{}\t{}", rsid, chrom, pos),
        None => bail!("{} not found", rsid),
    }
    Ok(())
}
