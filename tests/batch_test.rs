use bytes::Bytes;
use portkey_engine::batch::{BatchFactory, GraphQLBatchFactory};
use portkey_engine::error::BatchError;
use portkey_engine::fetch::{FetchResponse, GraphQLError};
use pretty_assertions::assert_eq;

const QUERY: &str = "query($representations: [_Any!]!){_entities(representations: $representations){... on Product {name price}}}";

fn input(representations: &str) -> Bytes {
    Bytes::from(format!(
        r#"{{"method":"POST","url":"http://product.service","body":{{"query":"{QUERY}","variables":{{"representations":{representations}}}}},"extract_entities":true}}"#
    ))
}

fn inputs(representations: &[&str]) -> Vec<Bytes> {
    representations.iter().map(|r| input(r)).collect()
}

fn assigned(batch: &portkey_engine::Batch) -> Vec<Vec<usize>> {
    batch
        .response_mappings
        .iter()
        .map(|m| m.assigned_input_indices.clone())
        .collect()
}

fn data(json: &str) -> FetchResponse {
    FetchResponse {
        data: Some(Bytes::copy_from_slice(json.as_bytes())),
        errors: Vec::new(),
    }
}

#[test]
fn creates_batch_with_unique_representations() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
        ]))
        .unwrap();

    assert_eq!(
        batch.resulted_input,
        input(r#"[{"upc":"top-1","__typename":"Product"},{"upc":"top-2","__typename":"Product"}]"#)
    );
    assert_eq!(batch.batch_size, 2);
    assert_eq!(assigned(&batch), vec![vec![0], vec![1]]);
}

#[test]
fn deduplicates_identical_representations() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
        ]))
        .unwrap();

    assert_eq!(batch.resulted_input, input(r#"[{"upc":"top-2","__typename":"Product"}]"#));
    assert_eq!(batch.batch_size, 2);
    assert_eq!(assigned(&batch), vec![vec![0, 1]]);
    assert_eq!(
        batch.response_mappings[0].original_representation,
        Bytes::from_static(br#"[{"upc":"top-2","__typename":"Product"}]"#)
    );
}

#[test]
fn deduplicates_multi_key_representations() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"category":"category-1", "name":"Top 1","__typename":"Product"}]"#,
            r#"[{"category":"category-2", "name":"Top 1","__typename":"Product"}]"#,
            r#"[{"category":"category-1", "name":"Top 1","__typename":"Product"}]"#,
            r#"[{"category":"category-2", "name":"Top 2","__typename":"Product"}]"#,
        ]))
        .unwrap();

    assert_eq!(
        batch.resulted_input,
        input(
            r#"[{"category":"category-1", "name":"Top 1","__typename":"Product"},{"category":"category-2", "name":"Top 1","__typename":"Product"},{"category":"category-2", "name":"Top 2","__typename":"Product"}]"#
        )
    );
    assert_eq!(batch.batch_size, 4);
    assert_eq!(assigned(&batch), vec![vec![0, 2], vec![1], vec![3]]);
}

#[test]
fn dedup_is_byte_exact() {
    // same entity, different key order
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
            r#"[{"__typename":"Product","upc":"top-1"}]"#,
        ]))
        .unwrap();
    assert_eq!(assigned(&batch), vec![vec![0], vec![1]]);
}

#[test]
fn rejects_input_without_representations() {
    let err = GraphQLBatchFactory::new()
        .create_batch(&[
            input(r#"[{"upc":"top-1"}]"#),
            Bytes::from_static(br#"{"method":"POST","url":"http://product.service","body":{"query":"{me {id}}"}}"#),
        ])
        .unwrap_err();
    assert!(matches!(err, BatchError::MalformedInput { index: 1, .. }));

    let err = GraphQLBatchFactory::new().create_batch(&[]).unwrap_err();
    assert!(matches!(err, BatchError::EmptyBatch));
}

#[test]
fn demultiplexes_unique_inputs() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
        ]))
        .unwrap();

    let outputs = batch
        .demultiplex(&data(
            r#"[{"name":"Name 1", "price": 1.01, "__typename":"Product"},{"name":"Name 2", "price": 2.01, "__typename":"Product"}]"#,
        ))
        .unwrap();

    assert_eq!(
        outputs,
        vec![
            data(r#"{"name":"Name 1", "price": 1.01, "__typename":"Product"}"#),
            data(r#"{"name":"Name 2", "price": 2.01, "__typename":"Product"}"#),
        ]
    );
}

#[test]
fn demultiplexes_deduplicated_inputs() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
        ]))
        .unwrap();

    let outputs = batch
        .demultiplex(&data(
            r#"[{"name":"Name 1", "price": 1.01, "__typename":"Product"},{"name":"Name 2", "price": 2.01, "__typename":"Product"}]"#,
        ))
        .unwrap();

    assert_eq!(
        outputs,
        vec![
            data(r#"{"name":"Name 1", "price": 1.01, "__typename":"Product"}"#),
            data(r#"{"name":"Name 2", "price": 2.01, "__typename":"Product"}"#),
            data(r#"{"name":"Name 1", "price": 1.01, "__typename":"Product"}"#),
        ]
    );
}

#[test]
fn unattributed_errors_go_to_null_outputs() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
        ]))
        .unwrap();

    let mut response = data(r#"[null,{"name":"Name 2", "price": 2.01, "__typename":"Product"}]"#);
    response.errors.push(GraphQLError::new("errorMessage"));
    let outputs = batch.demultiplex(&response).unwrap();

    let mut failed = data("null");
    failed.errors.push(GraphQLError::new("errorMessage"));
    assert_eq!(
        outputs,
        vec![
            failed,
            data(r#"{"name":"Name 2", "price": 2.01, "__typename":"Product"}"#),
        ]
    );
}

#[test]
fn errors_with_entity_path_go_to_their_slot() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
        ]))
        .unwrap();

    let mut error = GraphQLError::new("price unavailable");
    error.path = Some(serde_json::json!(["_entities", 1, "price"]));
    let mut response = data(r#"[{"name":"Name 1"},{"name":"Name 2","price":null}]"#);
    response.errors.push(error.clone());

    let outputs = batch.demultiplex(&response).unwrap();
    assert!(outputs[0].errors.is_empty());
    assert_eq!(outputs[1].errors, vec![error]);
}

#[test]
fn failed_call_hands_errors_to_every_output() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
        ]))
        .unwrap();

    let response = FetchResponse {
        data: None,
        errors: vec![GraphQLError::new("service unavailable")],
    };
    let outputs = batch.demultiplex(&response).unwrap();
    assert_eq!(outputs.len(), 2);
    for output in outputs {
        assert_eq!(output.data, None);
        assert_eq!(output.errors, vec![GraphQLError::new("service unavailable")]);
    }
}

#[test]
fn rejects_entity_count_mismatch() {
    let batch = GraphQLBatchFactory::new()
        .create_batch(&inputs(&[
            r#"[{"upc":"top-1","__typename":"Product"}]"#,
            r#"[{"upc":"top-2","__typename":"Product"}]"#,
        ]))
        .unwrap();

    let err = batch.demultiplex(&data(r#"[{"name":"Name 1"}]"#)).unwrap_err();
    assert!(matches!(
        err,
        BatchError::OutputCountMismatch {
            expected: 2,
            actual: 1
        }
    ));
}
