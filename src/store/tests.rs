use super::*;

fn sample_chunk(doc_type: &str, section: &str, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        metadata: ChunkMetadata {
            source: "portfolio.json".to_string(),
            doc_type: doc_type.to_string(),
            section: section.to_string(),
            company: None,
            project_name: None,
            institution: None,
        },
    }
}

#[test]
fn schema_has_expected_columns() {
    let schema = create_schema(4);

    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(
        names,
        vec![
            "id",
            "vector",
            "content",
            "source",
            "doc_type",
            "section",
            "company",
            "project_name",
            "institution",
            "chunk_index",
            "created_at"
        ]
    );

    let vector_field = schema.field_with_name("vector").expect("vector field");
    assert!(matches!(
        vector_field.data_type(),
        DataType::FixedSizeList(_, 4)
    ));
    assert!(schema.field_with_name("company").expect("company").is_nullable());
}

#[test]
fn record_batch_round_trips_metadata() {
    let mut chunk = sample_chunk("work_experience", "work_experience_0", "Perusahaan: PT Nusantara");
    chunk.metadata.company = Some("PT Nusantara".to_string());
    let chunks = vec![
        chunk,
        sample_chunk("skills", "skills_backend", "Keahlian Backend: Rust"),
    ];
    let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

    let batch = create_record_batch(&chunks, &embeddings, 2).expect("should build batch");
    assert_eq!(batch.num_rows(), 2);

    let parsed = parse_search_batch(&batch).expect("should parse");
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].text, "Perusahaan: PT Nusantara");
    assert_eq!(parsed[0].metadata.company, Some("PT Nusantara".to_string()));
    assert_eq!(parsed[1].metadata.company, None);
    assert_eq!(parsed[1].metadata.doc_type, "skills");
    // Without a _distance column the score defaults to a perfect match.
    assert!((parsed[0].score - 1.0).abs() < f32::EPSILON);
}

#[test]
fn record_batch_rejects_mismatched_dimensions() {
    let chunks = vec![sample_chunk("portfolio", "portfolio_0", "teks")];
    let embeddings = vec![vec![1.0, 0.0, 0.0]];

    let result = create_record_batch(&chunks, &embeddings, 2);
    assert!(matches!(result, Err(PortfolioError::Database(_))));
}
