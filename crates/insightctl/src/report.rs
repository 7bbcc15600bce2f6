//! The `report` subcommand: canned analytical queries over the corpus.

use std::collections::BTreeMap;
use std::path::PathBuf;

use corpus::{column, group_column, new_table, Apps, Datum};

#[derive(Debug, clap::Args)]
pub struct ReportArgs {
    /// Which report to run
    #[clap(value_enum)]
    report: Report,

    /// Directory holding the lock file and the downloaded archives
    #[clap(long, default_value = "./data")]
    cache_dir: PathBuf,

    /// Worker pool width for parallel archive reads
    #[clap(long, default_value_t = corpus::DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Write the result as CSV to the given path instead of a table
    #[clap(long)]
    csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Report {
    /// Apps per frontend major version, per environment
    Frontend,
    /// Apps per backend version
    Backend,
    /// Component type frequencies across every layout
    Components,
}

pub fn run(args: ReportArgs) -> anyhow::Result<()> {
    let apps = Apps::init(&args.cache_dir, args.pool_size)?;
    match args.report {
        Report::Frontend => {
            let groups = apps
                .group_by(vec![
                    column("Env", |s| s.app().env().to_string().into()),
                    column("Frontend major", |s| s.frontend_version().major().into()),
                ])
                .select(vec![group_column("Count", |group| group.len().into())]);
            match &args.csv {
                Some(path) => std::fs::write(path, groups.csv_string()?)?,
                None => println!("{}", groups.render_table()),
            }
        }
        Report::Backend => {
            let groups = apps
                .group_by(vec![column("Backend", |s| s.backend_version().into())])
                .select(vec![group_column("Count", |group| group.len().into())])
                .order_by(
                    |group| group.get("Backend").unwrap_or(Datum::Null),
                    true,
                );
            match &args.csv {
                Some(path) => std::fs::write(path, groups.csv_string()?)?,
                None => println!("{}", groups.render_table()),
            }
        }
        Report::Components => {
            let counts = apps
                .map_reduce(
                    |s| {
                        let mut counts = BTreeMap::<String, usize>::new();
                        for component in s.components().iter() {
                            if let Some(kind) = component.kind() {
                                *counts.entry(kind).or_default() += 1;
                            }
                        }
                        counts
                    },
                    |mut left, right| {
                        for (kind, count) in right {
                            *left.entry(kind).or_default() += count;
                        }
                        left
                    },
                )
                .unwrap_or_default();

            let mut table = new_table(vec!["Component".to_owned(), "Count".to_owned()]);
            for (kind, count) in &counts {
                table.add_row(vec![kind.clone(), count.to_string()]);
            }
            println!("{table}\nCount: {}", counts.len());
        }
    }
    Ok(())
}
