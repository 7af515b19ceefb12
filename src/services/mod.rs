pub mod connectivity;
pub mod gemini;
pub mod ingest;
pub mod report;
pub mod state;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;
