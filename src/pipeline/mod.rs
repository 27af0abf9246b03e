pub mod llm; // Ollama client, sanitization, scripted test double
pub mod summary; // Classify-then-extract summarization pipeline
