// LanceDB-backed vector index for portfolio chunks.
// One fixed table holds the active collection; rebuild replaces it wholesale.

#[cfg(test)]
mod tests;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ChunkingConfig;
use crate::embeddings::{DEFAULT_EMBEDDING_DIMENSION, Embedder};
use crate::ingest::{self, Chunk, ChunkMetadata};
use crate::{PortfolioError, Result};

const TABLE_NAME: &str = "portfolio";

/// Persisted vector index over the active chunk collection.
///
/// Ingestion and query embedding both go through the injected [`Embedder`],
/// so documents and queries share one vector space.
pub struct VectorStore {
    connection: Connection,
    embedder: Arc<dyn Embedder>,
}

/// A chunk returned from similarity search, ordered by decreasing score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

/// The single retrieval interface the chat layer depends on.
#[async_trait]
pub trait Retrieve: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>>;
}

/// Thin similarity-search façade over the shared store, parameterized by K.
pub struct Retriever {
    store: Arc<RwLock<VectorStore>>,
    k: usize,
}

impl Retriever {
    #[inline]
    pub fn new(store: Arc<RwLock<VectorStore>>, k: usize) -> Self {
        Self { store, k }
    }
}

#[async_trait]
impl Retrieve for Retriever {
    #[inline]
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.store.read().await.search(query, self.k).await
    }
}

impl VectorStore {
    /// Connect to the index directory, creating it if needed. Attachment to
    /// previously persisted data happens separately via [`Self::load`].
    #[inline]
    pub async fn open(index_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", index_dir);

        std::fs::create_dir_all(index_dir).map_err(|e| {
            PortfolioError::Database(format!("Failed to create index directory: {e}"))
        })?;

        let uri = format!("file://{}", index_dir.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| PortfolioError::Database(format!("Failed to connect to LanceDB: {e}")))?;

        Ok(Self {
            connection,
            embedder,
        })
    }

    /// Attach to a previously persisted collection. Returns true when the
    /// collection exists and holds at least one entry. Storage failures are
    /// swallowed to "not ready"; they are not fatal at startup.
    #[inline]
    pub async fn load(&self) -> bool {
        let ready = self.is_ready().await;
        if ready {
            info!("Loaded existing vector index with {} entries", self.count().await);
        } else {
            info!("No usable vector index found");
        }
        ready
    }

    /// Embed every chunk and replace the collection contents. Safe to call
    /// with an empty sequence; the table then exists but is not ready.
    #[inline]
    pub async fn build(&mut self, chunks: &[Chunk]) -> Result<usize> {
        info!("Building vector index with {} chunks", chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let dimension = embeddings
            .first()
            .map_or(DEFAULT_EMBEDDING_DIMENSION, Vec::len);

        self.drop_table_if_exists().await;

        let schema = create_schema(dimension);
        self.connection
            .create_empty_table(TABLE_NAME, schema.clone())
            .execute()
            .await
            .map_err(|e| PortfolioError::Database(format!("Failed to create table: {e}")))?;

        if !chunks.is_empty() {
            let batch = create_record_batch(chunks, &embeddings, dimension)?;
            let table = self.open_table().await?;
            let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
            table
                .add(reader)
                .execute()
                .await
                .map_err(|e| PortfolioError::Database(format!("Failed to insert entries: {e}")))?;
        }

        info!("Vector index built with {} entries", chunks.len());
        Ok(chunks.len())
    }

    /// Reformat the source file and rebuild the collection from it.
    /// Dropping the old collection is best-effort; the rebuild itself is
    /// what has to succeed.
    #[inline]
    pub async fn reload(&mut self, path: &Path, chunking: ChunkingConfig) -> Result<usize> {
        info!("Reloading knowledge source");
        let chunks = ingest::load_chunks(path, chunking)?;
        self.build(&chunks).await
    }

    /// Embed the query and return the `k` nearest entries by cosine
    /// similarity, best first.
    #[inline]
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if !self.table_exists().await {
            return Err(PortfolioError::NotInitialized);
        }

        let query_vector = self.embedder.embed(query).await?;
        let table = self.open_table().await?;

        let results = table
            .vector_search(query_vector)
            .map_err(|e| PortfolioError::Database(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| PortfolioError::Database(format!("Failed to execute search: {e}")))?;

        let mut retrieved = Vec::new();
        let mut stream = results;
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| PortfolioError::Database(format!("Failed to read result stream: {e}")))?
        {
            retrieved.extend(parse_search_batch(&batch)?);
        }

        debug!("Retrieved {} chunks for query", retrieved.len());
        Ok(retrieved)
    }

    /// Existence + positive-count check; never raises.
    #[inline]
    pub async fn is_ready(&self) -> bool {
        self.table_exists().await && self.count().await > 0
    }

    /// Entry count of the active collection; inspection failures count as
    /// zero.
    #[inline]
    pub async fn count(&self) -> u64 {
        let table = match self.connection.open_table(TABLE_NAME).execute().await {
            Ok(table) => table,
            Err(_) => return 0,
        };
        match table.count_rows(None).await {
            Ok(count) => count as u64,
            Err(e) => {
                warn!("Failed to count index entries: {}", e);
                0
            }
        }
    }

    async fn table_exists(&self) -> bool {
        match self.connection.table_names().execute().await {
            Ok(names) => names.contains(&TABLE_NAME.to_string()),
            Err(e) => {
                warn!("Failed to list tables: {}", e);
                false
            }
        }
    }

    async fn open_table(&self) -> Result<lancedb::Table> {
        self.connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| PortfolioError::Database(format!("Failed to open table: {e}")))
    }

    async fn drop_table_if_exists(&self) {
        if !self.table_exists().await {
            return;
        }
        if let Err(e) = self.connection.drop_table(TABLE_NAME).await {
            warn!("Failed to drop previous collection: {}", e);
        }
    }
}

fn create_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("content", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("doc_type", DataType::Utf8, false),
        Field::new("section", DataType::Utf8, false),
        Field::new("company", DataType::Utf8, true),
        Field::new("project_name", DataType::Utf8, true),
        Field::new("institution", DataType::Utf8, true),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

fn create_record_batch(
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
    dimension: usize,
) -> Result<RecordBatch> {
    let len = chunks.len();
    let created_at = chrono::Utc::now().to_rfc3339();

    let mut ids = Vec::with_capacity(len);
    let mut contents = Vec::with_capacity(len);
    let mut sources = Vec::with_capacity(len);
    let mut doc_types = Vec::with_capacity(len);
    let mut sections = Vec::with_capacity(len);
    let mut companies = Vec::with_capacity(len);
    let mut project_names = Vec::with_capacity(len);
    let mut institutions = Vec::with_capacity(len);
    let mut chunk_indices = Vec::with_capacity(len);
    let mut created_ats = Vec::with_capacity(len);

    for (i, chunk) in chunks.iter().enumerate() {
        ids.push(uuid::Uuid::new_v4().to_string());
        contents.push(chunk.text.as_str());
        sources.push(chunk.metadata.source.as_str());
        doc_types.push(chunk.metadata.doc_type.as_str());
        sections.push(chunk.metadata.section.as_str());
        companies.push(chunk.metadata.company.as_deref());
        project_names.push(chunk.metadata.project_name.as_deref());
        institutions.push(chunk.metadata.institution.as_deref());
        chunk_indices.push(i as u32);
        created_ats.push(created_at.as_str());
    }

    let mut flat_values = Vec::with_capacity(len * dimension);
    for embedding in embeddings {
        if embedding.len() != dimension {
            return Err(PortfolioError::Database(format!(
                "Inconsistent embedding dimensions: {} vs {}",
                embedding.len(),
                dimension
            )));
        }
        flat_values.extend_from_slice(embedding);
    }
    let values_array = Float32Array::from(flat_values);
    let item_field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array =
        FixedSizeListArray::try_new(item_field, dimension as i32, Arc::new(values_array), None)
            .map_err(|e| PortfolioError::Database(format!("Failed to create vector array: {e}")))?;

    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(contents)),
        Arc::new(StringArray::from(sources)),
        Arc::new(StringArray::from(doc_types)),
        Arc::new(StringArray::from(sections)),
        Arc::new(StringArray::from(companies)),
        Arc::new(StringArray::from(project_names)),
        Arc::new(StringArray::from(institutions)),
        Arc::new(UInt32Array::from(chunk_indices)),
        Arc::new(StringArray::from(created_ats)),
    ];

    RecordBatch::try_new(create_schema(dimension), arrays)
        .map_err(|e| PortfolioError::Database(format!("Failed to create record batch: {e}")))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<RetrievedChunk>> {
    let contents = string_column(batch, "content")?;
    let sources = string_column(batch, "source")?;
    let doc_types = string_column(batch, "doc_type")?;
    let sections = string_column(batch, "section")?;
    let companies = string_column(batch, "company")?;
    let project_names = string_column(batch, "project_name")?;
    let institutions = string_column(batch, "institution")?;

    let distances = batch
        .column_by_name("_distance")
        .map(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut results = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let metadata = ChunkMetadata {
            source: sources.value(row).to_string(),
            doc_type: doc_types.value(row).to_string(),
            section: sections.value(row).to_string(),
            company: optional_value(companies, row),
            project_name: optional_value(project_names, row),
            institution: optional_value(institutions, row),
        };

        let distance = distances
            .flatten()
            .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        results.push(RetrievedChunk {
            text: contents.value(row).to_string(),
            metadata,
            score: 1.0 - distance,
        });
    }

    Ok(results)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PortfolioError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| PortfolioError::Database(format!("Invalid {name} column type")))
}

fn optional_value(column: &StringArray, row: usize) -> Option<String> {
    if column.is_null(row) {
        None
    } else {
        Some(column.value(row).to_string())
    }
}
