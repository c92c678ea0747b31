//! End-to-end retrieval over an on-disk catalog with the offline hashing
//! embedder: load, build (and cache) the index, query, process free text.

use anyhow::Result;
use medcode_embed::{EmbeddingProvider, HashingProvider};
use medcode_retriever::{
    Catalog, CodingAssistant, MatchColumn, RetrievalOptions, Retriever, RetrieverConfig,
    extraction::{Category, LexiconEntry, LexiconExtractor},
    retrieval::EmbeddingIndex,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

const CATALOG: &str = "\
CODE,Medical term,Description
J20.9,Acute bronchitis,\"Acute bronchitis, unspecified\"
J40,Bronchitis,\"Bronchitis, not specified as acute or chronic\"
R50.9,Fever,\"Fever, unspecified\"
R05.9,Cough,\"Cough, unspecified\"
M54.50,Low back pain,\"Low back pain, unspecified\"
E11.9,Type 2 diabetes mellitus,Type 2 diabetes mellitus without complications
";

fn write_catalog() -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
    file.write_all(CATALOG.as_bytes())?;
    Ok(file)
}

async fn retriever(path: &Path, cache: Option<&Path>) -> Result<Retriever> {
    let catalog = Arc::new(Catalog::load(path)?);
    let provider = Arc::new(HashingProvider::new(128)?);
    Ok(Retriever::build(catalog, provider, 4, cache, RetrievalOptions::default()).await?)
}

#[tokio::test]
async fn test_bronchitis_query() -> Result<()> {
    let file = write_catalog()?;
    let retriever = retriever(file.path(), None).await?;

    let batch = retriever.retrieve("bronchitis").await;
    assert!(batch.is_complete());
    let results = batch.get("bronchitis").expect("term key present");

    assert_eq!(results.semantic.len(), 3);
    let semantic_codes: Vec<&str> = results.semantic.iter().map(|m| m.code.as_str()).collect();
    assert!(semantic_codes.contains(&"J20.9"), "{semantic_codes:?}");
    assert!(
        results
            .semantic
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity)
    );

    // "Bronchitis" (10 chars) is the shortest matching field
    assert_eq!(results.exact.len(), 3);
    assert_eq!(results.exact[0].code, "J40");
    assert_eq!(results.exact[0].matched_column, MatchColumn::Label);
    assert_eq!(results.exact[1].code, "J20.9");
    assert_eq!(results.exact[1].matched_column, MatchColumn::Label);
    Ok(())
}

#[tokio::test]
async fn test_multiple_terms_keep_order() -> Result<()> {
    let file = write_catalog()?;
    let retriever = retriever(file.path(), None).await?;

    let batch = retriever
        .retrieve(vec!["cough", "fever", "cough", "diabetes"])
        .await;
    assert_eq!(
        batch.keys().collect::<Vec<_>>(),
        vec!["cough", "fever", "diabetes"]
    );
    assert_eq!(batch.get("fever").unwrap().exact[0].code, "R50.9");
    assert_eq!(batch.get("diabetes").unwrap().exact[0].code, "E11.9");

    let json = serde_json::to_value(&batch)?;
    let keys: Vec<&String> = json["results"].as_object().unwrap().keys().collect();
    assert_eq!(keys.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_unmatched_term_is_empty_not_failed() -> Result<()> {
    let file = write_catalog()?;
    let retriever = retriever(file.path(), None).await?;

    let exact = retriever.exact_match("fracture");
    assert!(exact.is_complete());
    assert!(exact.get("fracture").unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_index_cache_reused_and_invalidated() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = dir.path().join("index.bin");
    let file = write_catalog()?;

    let first = retriever(file.path(), Some(&cache)).await?;
    assert!(cache.exists());

    let catalog = Catalog::load(file.path())?;
    let provider = HashingProvider::new(128)?;
    let cached =
        EmbeddingIndex::load(&cache, &catalog.fingerprint(), catalog.len(), &provider.model_id())
            .await?;
    assert_eq!(cached.vector(2)?, first.index().vector(2)?);

    // A changed catalog must not reuse the stale cache
    let mut changed = tempfile::Builder::new().suffix(".csv").tempfile()?;
    changed.write_all(CATALOG.as_bytes())?;
    writeln!(changed, "R51.9,Headache,\"Headache, unspecified\"")?;
    let rebuilt = retriever(changed.path(), Some(&cache)).await?;
    assert_eq!(rebuilt.index().len(), 7);
    assert_eq!(
        rebuilt.retrieve("headache").await.get("headache").unwrap().exact[0].code,
        "R51.9"
    );
    Ok(())
}

#[tokio::test]
async fn test_config_driven_build() -> Result<()> {
    let file = write_catalog()?;
    let raw = format!(
        "catalog_path = {:?}\ntop_k = 2\n\n[embedding]\nkind = \"hashing\"\ndimension = 32\n",
        file.path().display().to_string()
    );
    let config = RetrieverConfig::from_toml(&raw)?;

    let catalog = Arc::new(Catalog::load_with_delimiter(
        &config.catalog_path,
        config.delimiter_byte(),
    )?);
    let provider = config.embedding.create_provider().await?;
    assert_eq!(provider.embedding_dimension(), 32);

    let retriever = Retriever::build(
        catalog,
        provider,
        config.embed_batch_size,
        None,
        config.retrieval_options(),
    )
    .await?;
    let batch = retriever.retrieve("unspecified").await;
    let results = batch.get("unspecified").unwrap();
    assert_eq!(results.semantic.len(), 2);
    assert_eq!(results.exact.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_process_free_text() -> Result<()> {
    let file = write_catalog()?;
    let extractor = LexiconExtractor::new(vec![
        LexiconEntry::new("acute bronchitis", "C0149514").with_semantic_types(["T047"]),
        LexiconEntry::new("cough", "C0010200").with_semantic_types(["T184"]),
    ])?;
    let assistant = CodingAssistant::new(Arc::new(extractor), retriever(file.path(), None).await?);

    let outcome = assistant
        .process("Three days of cough, diagnosed with acute bronchitis.")
        .await?;
    let categories: Vec<Category> = outcome.terms.iter().map(|t| t.category).collect();
    assert_eq!(categories, vec![Category::Symptom, Category::Disease]);

    let results = outcome.results.expect("terms were found");
    assert_eq!(results.get("cough").unwrap().exact[0].code, "R05.9");
    assert_eq!(
        results.get("acute bronchitis").unwrap().exact[0].code,
        "J20.9"
    );
    Ok(())
}
