use std::panic;
use std::thread;

use nexus_contracts::{normalize, RawImagePayload};
use serde_json::Value;

use crate::decode::{decode, DisplayImage};

/// Classifies and decodes every response record, one output per record.
pub fn process(items: &[Value]) -> Vec<DisplayImage> {
    decode_all(&normalize(items))
}

pub fn decode_all(payloads: &[RawImagePayload]) -> Vec<DisplayImage> {
    payloads
        .iter()
        .enumerate()
        .map(|(index, payload)| decode(payload, index))
        .collect()
}

/// Same result as [`process`], with decoding spread over up to `workers`
/// scoped threads. Chunks are joined in order, so indices stay aligned.
pub fn process_parallel(items: &[Value], workers: usize) -> Vec<DisplayImage> {
    let payloads = normalize(items);
    let workers = workers.clamp(1, payloads.len().max(1));
    if workers == 1 {
        return decode_all(&payloads);
    }

    let chunk_size = payloads.len().div_ceil(workers);
    thread::scope(|scope| {
        let handles = payloads
            .chunks(chunk_size)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                let offset = chunk_idx * chunk_size;
                scope.spawn(move || {
                    chunk
                        .iter()
                        .enumerate()
                        .map(|(idx, payload)| decode(payload, offset + idx))
                        .collect::<Vec<DisplayImage>>()
                })
            })
            .collect::<Vec<_>>();

        let mut out = Vec::with_capacity(payloads.len());
        for handle in handles {
            match handle.join() {
                Ok(rows) => out.extend(rows),
                Err(cause) => panic::resume_unwind(cause),
            }
        }
        out
    })
}
