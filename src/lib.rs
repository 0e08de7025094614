pub mod core;
pub mod corpus;
pub mod embedding;
pub mod generator;
pub mod index;
pub mod llm;
pub mod prompt;
pub mod retrieval;
pub mod server;
pub mod state;
pub mod vector_math;
