use bytes::Bytes;
use fxhash::hash64;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

use crate::error::BatchError;
use crate::fetch::{FetchResponse, GraphQLError};

/// Merges entity fetch inputs that differ only in their representations.
pub trait BatchFactory: Send + Sync {
    fn create_batch(&self, inputs: &[Bytes]) -> Result<Batch, BatchError>;
}

/// One response slot of a batch and the inputs it answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseMapping {
    pub response_index: usize,
    /// Raw bytes of the `representations` array that opened this slot.
    pub original_representation: Bytes,
    pub assigned_input_indices: Vec<usize>,
    /// Position of the slot's first entity in the merged representations.
    entity_offset: usize,
    entity_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub resulted_input: Bytes,
    pub batch_size: usize,
    pub response_mappings: Vec<ResponseMapping>,
}

#[derive(Default)]
pub struct GraphQLBatchFactory;

impl GraphQLBatchFactory {
    pub fn new() -> Self {
        GraphQLBatchFactory
    }
}

#[derive(Deserialize)]
struct InputRef<'a> {
    #[serde(borrow)]
    body: BodyRef<'a>,
}

#[derive(Deserialize)]
struct BodyRef<'a> {
    #[serde(borrow)]
    variables: VariablesRef<'a>,
}

#[derive(Deserialize)]
struct VariablesRef<'a> {
    #[serde(borrow)]
    representations: &'a RawValue,
}

/// `body.variables.representations` of `input` and its byte range.
fn representations(input: &[u8]) -> Result<(&str, Range<usize>), serde_json::Error> {
    let parsed: InputRef<'_> = serde_json::from_slice(input)?;
    let raw = parsed.body.variables.representations.get();
    // the raw value borrows from `input`
    let start = raw.as_ptr() as usize - input.as_ptr() as usize;
    Ok((raw, start..start + raw.len()))
}

impl BatchFactory for GraphQLBatchFactory {
    fn create_batch(&self, inputs: &[Bytes]) -> Result<Batch, BatchError> {
        let first = inputs.first().ok_or(BatchError::EmptyBatch)?;

        let mut slots: HashMap<u64, usize> = HashMap::new();
        let mut response_mappings: Vec<ResponseMapping> = Vec::new();
        let mut merged: Vec<&str> = Vec::new();
        let mut first_range = 0..0;

        for (index, input) in inputs.iter().enumerate() {
            let (raw, range) = representations(input)
                .map_err(|source| BatchError::MalformedInput { index, source })?;
            if index == 0 {
                first_range = range.clone();
            }
            let representation = &input[range];

            let hash = hash64(representation);
            if let Some(&slot) = slots.get(&hash) {
                response_mappings[slot].assigned_input_indices.push(index);
                continue;
            }

            let entities: Vec<&RawValue> = serde_json::from_str(raw)
                .map_err(|source| BatchError::MalformedInput { index, source })?;

            slots.insert(hash, response_mappings.len());
            response_mappings.push(ResponseMapping {
                response_index: response_mappings.len(),
                original_representation: input.slice_ref(representation),
                assigned_input_indices: vec![index],
                entity_offset: merged.len(),
                entity_count: entities.len(),
            });
            merged.extend(entities.iter().map(|entity| entity.get()));
        }

        let mut resulted_input = Vec::with_capacity(first.len());
        resulted_input.extend_from_slice(&first[..first_range.start]);
        resulted_input.push(b'[');
        resulted_input.extend_from_slice(merged.join(",").as_bytes());
        resulted_input.push(b']');
        resulted_input.extend_from_slice(&first[first_range.end..]);

        debug!(batch_size = inputs.len(), slots = response_mappings.len(), "created entity batch");
        Ok(Batch {
            resulted_input: Bytes::from(resulted_input),
            batch_size: inputs.len(),
            response_mappings,
        })
    }
}

impl Batch {
    /// Splits the response of the merged fetch into one response per original input,
    /// in input order. Inputs sharing a slot receive separate copies of its data.
    pub fn demultiplex(&self, response: &FetchResponse) -> Result<Vec<FetchResponse>, BatchError> {
        let mut outputs = vec![FetchResponse::default(); self.batch_size];

        let entities: Option<Vec<&RawValue>> = match &response.data {
            Some(data) => match serde_json::from_slice::<Vec<&RawValue>>(data) {
                Ok(entities) => Some(entities),
                // a single non array value, the call failed as a whole
                Err(_) if serde_json::from_slice::<&RawValue>(data).is_ok() => None,
                Err(err) => return Err(BatchError::MalformedResponse(err)),
            },
            None => None,
        };

        let Some(entities) = entities else {
            for output in &mut outputs {
                output.errors = response.errors.clone();
            }
            return Ok(outputs);
        };

        let expected = self
            .response_mappings
            .iter()
            .map(|m| m.entity_count)
            .sum::<usize>();
        if entities.len() != expected {
            return Err(BatchError::OutputCountMismatch {
                expected,
                actual: entities.len(),
            });
        }

        let slot_data: Vec<Bytes> = self
            .response_mappings
            .iter()
            .map(|mapping| slot_data(mapping, &entities))
            .collect();
        let slot_errors = self.assign_errors(&response.errors, &slot_data);

        for (slot, mapping) in self.response_mappings.iter().enumerate() {
            for &input in &mapping.assigned_input_indices {
                let output = outputs.get_mut(input).ok_or(BatchError::OutputCountMismatch {
                    expected: self.batch_size,
                    actual: input + 1,
                })?;
                output.data = Some(Bytes::copy_from_slice(&slot_data[slot]));
                output.errors.extend(slot_errors[slot].iter().cloned());
            }
        }
        Ok(outputs)
    }

    fn slot_for_entity(&self, entity: usize) -> Option<usize> {
        self.response_mappings
            .iter()
            .position(|m| (m.entity_offset..m.entity_offset + m.entity_count).contains(&entity))
    }

    // Errors pointing at `_entities.<n>` belong to the slot holding entity n. The rest go to
    // slots whose data is null, or to every slot when none is.
    fn assign_errors(&self, errors: &[GraphQLError], slot_data: &[Bytes]) -> Vec<Vec<GraphQLError>> {
        let mut assigned = vec![Vec::new(); self.response_mappings.len()];
        let null_slots: Vec<usize> = slot_data
            .iter()
            .enumerate()
            .filter(|(_, data)| data.as_ref() == b"null")
            .map(|(slot, _)| slot)
            .collect();

        for error in errors {
            let slot = entity_index(error).and_then(|entity| self.slot_for_entity(entity));
            match slot {
                Some(slot) => assigned[slot].push(error.clone()),
                None if null_slots.is_empty() => {
                    assigned.iter_mut().for_each(|slot| slot.push(error.clone()))
                }
                None => null_slots
                    .iter()
                    .for_each(|&slot| assigned[slot].push(error.clone())),
            }
        }
        assigned
    }
}

fn slot_data(mapping: &ResponseMapping, entities: &[&RawValue]) -> Bytes {
    let slice = &entities[mapping.entity_offset..mapping.entity_offset + mapping.entity_count];
    match slice {
        [single] => Bytes::copy_from_slice(single.get().as_bytes()),
        many => {
            let joined: Vec<&str> = many.iter().map(|e| e.get()).collect();
            Bytes::from(format!("[{}]", joined.join(",")))
        }
    }
}

fn entity_index(error: &GraphQLError) -> Option<usize> {
    let path = error.path.as_ref()?.as_array()?;
    match path.as_slice() {
        [first, index, ..] if first.as_str() == Some("_entities") => {
            index.as_u64().and_then(|i| usize::try_from(i).ok())
        }
        _ => None,
    }
}
