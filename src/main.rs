use std::path::PathBuf;

use clap::Parser;
use topicsweep::{
    export_app_data, CoherenceMetric, ModelFamily, ModelOptimizer, OpenAiCompletion, OptimizerError, Settings, Table,
    TopicRange,
};

#[derive(Parser, Debug)]
#[command(version, about = "Finds the most coherent number of topics in a lemmatised CSV corpus", long_about = None)]
struct Args {
    /// CSV file with one document per row
    path: PathBuf,
    #[clap(long, help = "JSON settings file; command line options override it")]
    config: Option<PathBuf>,
    #[clap(long, help = "Column holding the lemmas of each document")]
    lemma_column: Option<String>,
    #[clap(short, long, value_parser = parse_filter, help = "Keep only rows where COLUMN=VALUE (repeatable)")]
    filter: Vec<(String, String)>,
    #[clap(short, long, value_delimiter = ',', help = "Words to drop before modelling (repeatable or comma separated)")]
    exclude: Vec<String>,
    #[clap(short, long, help = "Candidate topic counts, e.g. 2..11 (end excluded)")]
    topics: Option<TopicRange>,
    #[clap(long, help = "Model family: lda or nmf")]
    family: Option<ModelFamily>,
    #[clap(long, help = "Coherence measure: u_mass, c_v, c_uci or c_npmi")]
    coherence: Option<CoherenceMetric>,
    #[clap(long, help = "Words per topic used for coherence scoring")]
    coherence_words: Option<usize>,
    #[clap(short, long, help = "Seed for model fitting and projections")]
    seed: Option<u64>,
    #[clap(short, long, help = "Column to group document topics by")]
    group_column: Option<String>,
    #[clap(short = 'w', long, help = "Words to show per topic")]
    num_words: Option<usize>,
    #[clap(short, long, value_delimiter = ',', help = "Topic names in topic order, comma separated")]
    names: Option<Vec<String>>,
    #[clap(long, help = "Ask the completion service for topic titles")]
    name_topics: bool,
    #[clap(long, help = "Completion model used for topic titles")]
    completion_model: Option<String>,
    #[clap(long, help = "Sampling temperature for topic titles")]
    temperature: Option<f64>,
    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true, help = "API key for the completion service")]
    api_key: Option<String>,
    #[clap(short, long, help = "Directory to export app data to. Nothing is written if not specified.")]
    out: Option<PathBuf>,
    #[clap(short, long, help = "Label prefixed to every exported file")]
    label: Option<String>,
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(column, value)| (column.trim().to_string(), value.trim().to_string()))
        .ok_or_else(|| format!("expected COLUMN=VALUE, got '{s}'"))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    println!("Path: {}", args.path.display());

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_settings(args: &Args) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };

    let optimizer = &mut settings.optimizer;
    if let Some(column) = &args.lemma_column {
        optimizer.lemma_column = column.clone();
    }
    optimizer.column_filter.extend(args.filter.iter().cloned());
    optimizer.words_to_remove.extend(args.exclude.iter().cloned());
    if let Some(range) = args.topics {
        optimizer.topic_numbers_range = range;
    }
    if let Some(coherence) = args.coherence {
        optimizer.coherence_measure = coherence;
    }
    if let Some(family) = args.family {
        optimizer.model.family = family;
    }
    if let Some(num_words) = args.coherence_words {
        optimizer.coherence_num_words = num_words;
    }
    if args.seed.is_some() {
        optimizer.random_state = args.seed;
    }

    let export = &mut settings.export;
    if let Some(column) = &args.group_column {
        export.column = column.clone();
    }
    if let Some(num_words) = args.num_words {
        export.num_words = num_words;
    }
    if let Some(out) = &args.out {
        export.path = out.clone();
    }
    if let Some(label) = &args.label {
        export.label = label.clone();
    }

    let naming = &mut settings.naming;
    if let Some(model) = &args.completion_model {
        naming.model = model.clone();
    }
    if let Some(temperature) = args.temperature {
        naming.temperature = temperature;
    }
    Ok(settings)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings(args)?;
    let data = Table::from_csv_path(&args.path)?;
    println!("Loaded {} rows with columns: {}", data.len(), data.columns().join(", "));
    println!(
        "Trying {} topics with {} models scored by {}...",
        settings.optimizer.topic_numbers_range, settings.optimizer.model.family, settings.optimizer.coherence_measure
    );

    let mut optimizer = ModelOptimizer::new(&data, settings.optimizer.clone())?;
    print_coherences(&optimizer);

    if let Some(names) = &args.names {
        if let Err(err) = optimizer.name_topics_manually(names.clone()) {
            println!("⚠️  Keeping the current topic names: {}", err);
        }
    }
    if args.name_topics {
        let api_key = args.api_key.as_deref().ok_or(OptimizerError::MissingCredential)?;
        let completion = OpenAiCompletion::new(api_key)?;
        println!("Naming {} topics...", optimizer.topics_num());
        optimizer.name_topics_automatically(&completion, &settings.naming)?;
    }

    print_topics(&optimizer, settings.export.num_words)?;

    if args.out.is_some() {
        let files = export_app_data(&optimizer, &settings.export)?;
        println!("\n📁 Exported files:");
        for path in files.iter() {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

fn print_coherences(optimizer: &ModelOptimizer) {
    println!("\n📊 Coherence by number of topics:");
    for (num_topics, score) in optimizer.coherences().iter() {
        let marker = if num_topics == optimizer.topics_num() { " ⭐" } else { "" };
        println!("  {:>3} topics: {:.4}{}", num_topics, score, marker);
    }
}

fn print_topics(optimizer: &ModelOptimizer, num_words: usize) -> Result<(), Box<dyn std::error::Error>> {
    let table = optimizer.topics_table(num_words)?;
    println!("\n🏷️  {} topics:", optimizer.topics_num());
    for (topic_id, name) in optimizer.topic_names().iter() {
        let words: Vec<String> = table
            .for_topic(topic_id)
            .map(|row| format!("{} ({:.3})", row.word, row.importance))
            .collect();
        println!("  {}: {}", name, words.join(", "));
    }
    Ok(())
}
