use std::fs;

use topicsweep::{
    export_app_data, load_model, AppExportConfig, ColumnFilter, ModelOptimizer, OptimizerConfig, Table, TopicRange,
    Tsne, Umap,
};

fn survey_csv() -> String {
    let economy = "\"['tax', 'salary', 'work', 'market', 'price', 'tax']\"";
    let health = "\"['doctor', 'hospital', 'health', 'disease', 'vaccine', 'doctor']\"";
    let mut csv = String::from("country,year,region,lemmas\n");
    for (i, country) in ["Poland", "Spain", "Malta", "Italy", "Greece", "Czech Republic"].iter().enumerate() {
        for year in ["2020", "2021"] {
            let lemmas = if i % 2 == 0 { economy } else { health };
            csv.push_str(&format!("{country},{year},EU,{lemmas}\n"));
        }
    }
    csv.push_str("Norway,2020,EFTA,\"['fish', 'oil']\"\n");
    csv
}

fn config() -> OptimizerConfig {
    OptimizerConfig {
        column_filter: ColumnFilter::from([("region".to_string(), "EU".to_string())]),
        topic_numbers_range: TopicRange::new(2, 4),
        random_state: Some(7),
        coherence_num_words: 5,
        ..OptimizerConfig::default()
    }
}

#[test]
fn sweep_and_export_app_data() {
    let data = Table::from_reader(survey_csv().as_bytes()).unwrap();
    let optimizer = ModelOptimizer::new(&data, config()).unwrap();

    assert_eq!(optimizer.data().len(), 12);
    assert_eq!(optimizer.coherences().len(), 2);
    assert!((2..4).contains(&optimizer.topics_num()));

    let dir = tempfile::tempdir().unwrap();
    let export = AppExportConfig {
        num_words: 5,
        column: "country".to_string(),
        tsne: Tsne {
            perplexity: 2.0,
            n_iter: 300,
            ..Tsne::default()
        },
        umap: Umap {
            n_neighbors: 3,
            n_epochs: Some(100),
            ..Umap::default()
        },
        path: dir.path().join("app"),
        label: "survey".to_string(),
    };
    let files = export_app_data(&optimizer, &export).unwrap();

    for path in files.iter() {
        assert!(path.exists(), "{} is missing", path.display());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("survey_EU_"), "{name}");
    }

    let mapping = fs::read_to_string(&files.mapping).unwrap();
    let mut lines = mapping.lines();
    assert_eq!(lines.next(), Some("country,tsne_x,tsne_y,umap_x,umap_y"));
    assert_eq!(lines.count(), 6);

    let probs = fs::read_to_string(&files.probs).unwrap();
    assert_eq!(probs.lines().count(), 1 + 6);
    assert!(probs.contains("Czech Republic,"));

    let topic_words = fs::read_to_string(&files.topic_words).unwrap();
    assert_eq!(topic_words.lines().count(), 1 + 5 * optimizer.topics_num());

    let model = load_model(&files.model).unwrap();
    assert_eq!(model.num_topics(), optimizer.topics_num());
}

#[test]
fn manual_names_reach_the_group_table() {
    let data = Table::from_reader(survey_csv().as_bytes()).unwrap();
    let mut optimizer = ModelOptimizer::new(&data, config()).unwrap();
    let names: Vec<String> = (0..optimizer.topics_num()).map(|i| format!("Theme {i}")).collect();
    optimizer.name_topics_manually(names).unwrap();

    let groups = optimizer.topic_probs_by_column("country", true).unwrap();
    assert_eq!(groups.headers[0], "Theme 0_0");
    assert_eq!(groups.headers.len(), optimizer.topics_num() * 2);
}
