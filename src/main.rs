use std::io::Read;
use std::sync::Arc;

use doc_intake::config::ClassifierConfig;
use doc_intake::pipeline::DocumentPipeline;
use doc_intake::scorer::{LexiconScorer, SentimentIntentScorer};
use doc_intake::store::{ConversationId, ConversationStore, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let db_path =
        std::env::var("DOC_INTAKE_DB_PATH").unwrap_or_else(|_| "./data/doc-intake.db".to_string());

    let conversation_id = std::env::var("DOC_INTAKE_CONVERSATION")
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    let mut classifier_config = ClassifierConfig::default();
    if let Ok(deadline_ms) = std::env::var("DOC_INTAKE_SCORER_DEADLINE_MS") {
        classifier_config.scorer_deadline = deadline_ms
            .parse()
            .map(std::time::Duration::from_millis)
            .unwrap_or(classifier_config.scorer_deadline);
    }

    // First argument is an input file; otherwise the document comes from stdin.
    let raw = match std::env::args().nth(1) {
        Some(path) => std::fs::read(&path).unwrap_or_else(|e| {
            eprintln!("Error: Failed to read {}: {}", path, e);
            std::process::exit(1);
        }),
        None => {
            let mut buffer = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buffer)
                .unwrap_or_else(|e| {
                    eprintln!("Error: Failed to read stdin: {}", e);
                    std::process::exit(1);
                });
            buffer
        }
    };

    eprintln!("📥 Doc Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", db_path);
    eprintln!("   Conversation: {}", conversation_id);
    eprintln!("   Document: {} bytes\n", raw.len());

    let backend = LibSqlBackend::new_local(std::path::Path::new(&db_path))
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {}: {}", db_path, e);
            std::process::exit(1);
        });
    let store = ConversationStore::new(Arc::new(backend));

    let scorer = Arc::new(SentimentIntentScorer::new(Arc::new(LexiconScorer)));
    let pipeline = DocumentPipeline::new(store.clone(), scorer, classifier_config);

    let conversation = ConversationId::new(conversation_id)?;
    let result = pipeline.ingest(&raw, &conversation).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    let history = store.get_history(&conversation).await?;
    eprintln!("\n   Trail for {} ({} records):", conversation, history.len());
    for record in &history {
        eprintln!(
            "   [{}] {} {}",
            record.timestamp.to_rfc3339(),
            record.agent,
            record.action
        );
    }

    Ok(())
}
