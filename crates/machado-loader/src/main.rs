//! machado-load - run one loader job against the configured database

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use machado_common::logging::{init_logging, LogConfig, LogLevel};
use machado_loader::config::LoaderConfig;
use machado_loader::jobs::{
    self, AnnotationJob, FastaJob, FeatureFileJob, GffJob, JobContext, JobReport, OntologyJob, PublicationJob,
    RelationshipJob,
};
use machado_loader::loaders::organism::OrganismRequest;
use machado_loader::loaders::{NotFoundPolicy, PropertyPolicy};
use machado_loader::store::PgStore;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "machado-load")]
#[command(author, version, about = "Load biological data files into a machado database")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only warnings and errors; no progress bar
    #[arg(short, long, global = true)]
    quiet: bool,

    /// User recorded in the job history
    #[arg(long, env = "MACHADO_USER", global = true)]
    user: Option<String>,
}

/// Arguments shared by jobs over a `feature<TAB>value` file
#[derive(Args, Debug)]
struct FeatureFileArgs {
    /// Input file
    #[arg(long)]
    file: PathBuf,

    /// Species name (eg. Homo sapiens, Mus musculus)
    #[arg(long)]
    organism: String,

    /// Sequence Ontology term of the features (eg. mRNA, polypeptide)
    #[arg(long)]
    soterm: String,

    /// Number of workers
    #[arg(long)]
    cpu: Option<usize>,

    /// List features that cannot be found instead of failing
    #[arg(long)]
    ignorenotfound: bool,
}

impl From<FeatureFileArgs> for FeatureFileJob {
    fn from(args: FeatureFileArgs) -> Self {
        FeatureFileJob {
            cpu: args.cpu,
            ..FeatureFileJob::new(args.file, args.organism, args.soterm)
        }
        .ignore_not_found(args.ignorenotfound)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a FASTA file as new features
    LoadFasta {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        organism: String,
        /// Sequence Ontology term (eg. chromosome, assembly)
        #[arg(long)]
        soterm: String,
        /// Don't load the residues
        #[arg(long)]
        nosequence: bool,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// DOI of a loaded publication to link every feature to
        #[arg(long)]
        doi: Option<String>,
        #[arg(long)]
        cpu: Option<usize>,
    },

    /// Load a two-column file of feature name and annotation text
    LoadFeatureAnnotation {
        #[command(flatten)]
        target: FeatureFileArgs,
        /// Property term (eg. display, note)
        #[arg(long)]
        cvterm: String,
        #[arg(long)]
        doi: Option<String>,
        /// Remove existing values of the property before loading
        #[arg(long)]
        replace: bool,
    },

    /// Load a two-column file of feature name and db:accession
    LoadFeatureDbxrefs {
        #[command(flatten)]
        target: FeatureFileArgs,
    },

    /// Load residues of existing features from a FASTA file
    LoadFeatureSequence {
        #[command(flatten)]
        target: FeatureFileArgs,
    },

    /// Load a two-column file of feature name and DOI
    LoadFeaturePublication {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        organism: String,
        #[arg(long)]
        cpu: Option<usize>,
        #[arg(long)]
        ignorenotfound: bool,
    },

    /// Load a two-column file of subject and object feature names
    LoadFeatureRelationships {
        #[command(flatten)]
        target: FeatureFileArgs,
        /// Relations Ontology term (eg. part_of)
        #[arg(long, default_value = "part_of")]
        relationship: String,
    },

    /// Load a GFF3 file
    LoadGff {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        organism: String,
        /// Feature types to skip (comma separated)
        #[arg(long, value_delimiter = ',')]
        ignore: Vec<String>,
        #[arg(long)]
        doi: Option<String>,
        #[arg(long)]
        cpu: Option<usize>,
        #[arg(long)]
        ignorenotfound: bool,
    },

    /// Load the Relations Ontology as the `relationship` vocabulary
    LoadRelationsOntology {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        cpu: Option<usize>,
    },

    /// Load the Sequence Ontology as the `sequence` vocabulary
    LoadSo {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        cpu: Option<usize>,
    },

    /// Load the Gene Ontology, one vocabulary per namespace
    LoadGo {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        cpu: Option<usize>,
    },

    /// Load any OBO file into a named vocabulary
    LoadOntology {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        vocabulary: String,
        #[arg(long)]
        use_namespaces: bool,
        #[arg(long)]
        cpu: Option<usize>,
    },

    /// Load BibTeX publication records
    LoadPublication {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        cpu: Option<usize>,
    },

    /// Register an organism
    InsertOrganism {
        #[arg(long)]
        genus: String,
        #[arg(long)]
        species: String,
        #[arg(long)]
        infraspecific_name: Option<String>,
        #[arg(long)]
        abbreviation: Option<String>,
        #[arg(long)]
        common_name: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Apply the schema migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // LOG_* variables take precedence over the flags
    let log_config = match std::env::var_os("LOG_LEVEL") {
        Some(_) => LogConfig::from_env()?,
        None => LogConfig::builder()
            .level(LogLevel::from_verbosity(cli.verbose, cli.quiet))
            .log_file_prefix("machado-load")
            .build(),
    };
    let _guard = init_logging(&log_config)?;

    let mut config = LoaderConfig::load()?;
    if let Some(user) = cli.user.clone() {
        config.loader.user = user;
    }

    let store = PgStore::connect(&config.database).await?;
    if matches!(cli.command, Command::Migrate) {
        store.migrate().await?;
        info!("Migrations applied");
        return Ok(());
    }

    let ctx = JobContext::from_settings(Arc::new(store), &config.loader).with_progress(!cli.quiet);
    let report = execute(&ctx, cli.command).await?;
    print_report(&report);

    if !report.is_success() {
        error!(job_id = report.job_id, command = %report.command, "Job failed");
        process::exit(1);
    }
    Ok(())
}

async fn execute(ctx: &JobContext, command: Command) -> machado_loader::Result<JobReport> {
    match command {
        Command::LoadFasta {
            file,
            organism,
            soterm,
            nosequence,
            description,
            url,
            doi,
            cpu,
        } => {
            let job = FastaJob {
                nosequence,
                description,
                url,
                doi,
                cpu,
                ..FastaJob::new(file, organism, soterm)
            };
            jobs::load_fasta(ctx, job).await
        },
        Command::LoadFeatureAnnotation {
            target,
            cvterm,
            doi,
            replace,
        } => {
            let job = AnnotationJob {
                target: target.into(),
                cvterm,
                doi,
                property_policy: if replace {
                    PropertyPolicy::Replace
                } else {
                    PropertyPolicy::Append
                },
            };
            jobs::load_feature_annotation(ctx, job).await
        },
        Command::LoadFeatureDbxrefs { target } => jobs::load_feature_dbxrefs(ctx, target.into()).await,
        Command::LoadFeatureSequence { target } => jobs::load_feature_sequence(ctx, target.into()).await,
        Command::LoadFeaturePublication {
            file,
            organism,
            cpu,
            ignorenotfound,
        } => {
            let job = FeatureFileJob {
                cpu,
                ..FeatureFileJob::new(file, organism, "")
            }
            .ignore_not_found(ignorenotfound);
            jobs::load_feature_publication(ctx, job).await
        },
        Command::LoadFeatureRelationships {
            target,
            relationship,
        } => {
            let job = RelationshipJob {
                target: target.into(),
                relationship,
            };
            jobs::load_feature_relationships(ctx, job).await
        },
        Command::LoadGff {
            file,
            organism,
            ignore,
            doi,
            cpu,
            ignorenotfound,
        } => {
            let job = GffJob {
                ignore,
                doi,
                cpu,
                not_found: NotFoundPolicy::from_ignore_flag(ignorenotfound),
                ..GffJob::new(file, organism)
            };
            jobs::load_gff(ctx, job).await
        },
        Command::LoadRelationsOntology { file, cpu } => {
            jobs::load_ontology(ctx, OntologyJob {
                cpu,
                ..OntologyJob::relations(file)
            })
            .await
        },
        Command::LoadSo { file, cpu } => {
            jobs::load_ontology(ctx, OntologyJob {
                cpu,
                ..OntologyJob::sequence(file)
            })
            .await
        },
        Command::LoadGo { file, cpu } => {
            jobs::load_ontology(ctx, OntologyJob {
                cpu,
                ..OntologyJob::gene(file)
            })
            .await
        },
        Command::LoadOntology {
            file,
            vocabulary,
            use_namespaces,
            cpu,
        } => {
            let job = OntologyJob {
                use_namespaces,
                cpu,
                ..OntologyJob::new(file, vocabulary)
            };
            jobs::load_ontology(ctx, job).await
        },
        Command::LoadPublication { file, cpu } => {
            jobs::load_publication(ctx, PublicationJob { file, cpu }).await
        },
        Command::InsertOrganism {
            genus,
            species,
            infraspecific_name,
            abbreviation,
            common_name,
            comment,
        } => {
            let request = OrganismRequest {
                genus,
                species,
                infraspecific_name,
                abbreviation,
                common_name,
                comment,
            };
            jobs::insert_organism(ctx, request).await
        },
        Command::Migrate => Err(machado_loader::IngestError::Validation(
            "migrate is not a loader job".into(),
        )),
    }
}

fn print_report(report: &JobReport) {
    println!("[{}] {} (job {})", report.status, report.description, report.job_id);
    if !report.not_found.is_empty() {
        println!("List of features not found:");
        for name in &report.not_found {
            println!("{}", name);
        }
    }
    for conflict in &report.conflicts {
        println!("conflict: {}", conflict);
    }
}
