pub mod completion;
pub mod detokenize;
pub mod embeddings;
pub mod infill;
pub mod open_ai;
pub mod props;
pub mod rerank;
pub mod stream;
pub mod tokenize;
pub mod types;
