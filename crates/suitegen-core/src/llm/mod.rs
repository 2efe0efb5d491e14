pub mod accessor;
pub mod backend;
pub mod catalog;
pub mod chat;
pub mod hyperparams;
pub mod ollama;
pub mod openai;
pub mod scripted;
pub mod tokenizer;
