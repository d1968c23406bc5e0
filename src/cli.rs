#[cfg(feature = "bin")]
pub mod bin {
    use crate::database::{read_json_file, MatrixDescription};
    use crate::*;
    use clap::Parser;
    use std::path::PathBuf;

    #[derive(Debug, Parser)]
    #[command(version, about = env!("CARGO_PKG_DESCRIPTION"))]
    struct Args {
        /// JSON files with matrix descriptions
        #[clap(short, long)]
        matrices: Vec<PathBuf>,
        /// JSON files with tensor descriptions
        #[clap(short, long)]
        tensors: Vec<PathBuf>,
        /// JSON file with groups and memory layouts
        #[clap(short, long)]
        layout: Option<PathBuf>,
        /// Stores the named tensor transposed
        #[clap(long)]
        transpose: Vec<String>,
        /// Pads the leading dimension of the named tensor
        #[clap(long)]
        align: Vec<String>,
        /// Expands a description into several tensors, as `SOURCE=NAME,NAME,...`
        #[clap(long = "clone", value_parser = parse_clone)]
        clones: Vec<(String, Vec<String>)>,
        /// Vector width in reals used to report aligned shapes
        #[clap(long, default_value = "1")]
        alignment: usize,
    }

    fn parse_clone(arg: &str) -> Result<(String, Vec<String>), String> {
        let (source, names) = arg
            .split_once('=')
            .ok_or_else(|| format!("expected SOURCE=NAME,..., got {arg}"))?;
        Ok((
            source.to_owned(),
            names.split(',').map(str::to_owned).collect(),
        ))
    }

    /// Loads the given descriptions into a [`TensorDatabase`], finalizes it
    /// with the layout description and prints every tensor.
    #[allow(clippy::disallowed_macros)]
    pub fn cli() {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .format_timestamp(None)
            .format_target(false)
            .parse_default_env()
            .init();

        let args = Args::parse();
        match run(&args) {
            Ok(db) => {
                for tensor in db.iter() {
                    println!("{}", describe(tensor, args.alignment));
                }
            }
            Err(err) => {
                log::error!("{err}");
                std::process::exit(1)
            }
        }
    }

    fn run(args: &Args) -> Result<TensorDatabase, Error> {
        let mut options = DescriptionOptions::default();
        for (source, names) in &args.clones {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            options = options.with_clone(source, &names);
        }
        let transpose = args.transpose.clone();
        let align = args.align.clone();
        let options = options
            .with_transpose(move |name| transpose.iter().any(|t| t == name))
            .with_align_stride(move |name| align.iter().any(|a| a == name));

        let mut db = TensorDatabase::default();
        for path in &args.matrices {
            let descriptions: Vec<MatrixDescription> = read_json_file(path)?;
            db.add_matrices(&descriptions, &options)?;
        }
        for path in &args.tensors {
            let descriptions: Vec<TensorDescription> = read_json_file(path)?;
            db.add_tensors(&descriptions, &options)?;
        }
        if let Some(path) = &args.layout {
            let layout: LayoutDescription = read_json_file(path)?;
            apply_layout(&mut db, &layout, &options.clones)?;
        }
        log::info!("Loaded {} tensors", db.len());
        Ok(db)
    }

    fn describe(tensor: &Tensor, alignment: usize) -> String {
        let bounding_box = tensor
            .bounding_box()
            .map_or_else(|| "empty".to_owned(), |bb| bb.to_string());
        let layout = match tensor.memory_layout() {
            MemoryLayout::Dense(dense) => {
                format!("dense {:?}", dense.aligned_shape(alignment))
            }
            MemoryLayout::Csc(csc) => format!("csc nnz={}", csc.nnz()),
        };
        format!(
            "{} {:?} nnz={} box={} {}{}",
            tensor.name(),
            tensor.shape(),
            tensor.spp().count_nonzero(),
            bounding_box,
            layout,
            if tensor.has_group_spp() { " grouped" } else { "" }
        )
    }
}
