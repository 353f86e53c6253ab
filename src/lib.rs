//! # dochat
//!
//! A personal document Q&A service.
//!
//! Users upload documents (plain text, Word, PDF, images); dochat extracts
//! the text (with OCR fallback for scans), asks a language model to structure
//! it into titled sections, chunks the sections, embeds the chunks, and
//! stores them in a per-user vector collection. Questions are answered by
//! retrieving the most relevant chunks for that user and prompting the model
//! to answer strictly from the retrieved excerpts.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌───────────┐   ┌───────────┐   ┌────────┐   ┌───────────┐
//! │ Upload │──▶│ Extract   │──▶│ LLM       │──▶│ Chunk  │──▶│ Embed +   │
//! │        │   │ (+ OCR)   │   │ structure │   │        │   │ index     │
//! └────────┘   └───────────┘   └───────────┘   └────────┘   └─────┬─────┘
//!                                                                 │
//!                       ┌───────────┐   ┌──────────┐       ┌──────▼──────┐
//!      question ───────▶│ Retrieve  │──▶│ Grounded │       │ SQLite      │
//!                       │ (per-user)│   │ answer   │       │ docs + vecs │
//!                       └───────────┘   └──────────┘       └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dochat init                                   # create database
//! dochat ingest notes.txt --owner alice@example.com
//! dochat ask "what are my notes about?" --owner alice@example.com
//! dochat serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Multi-format text extraction with OCR fallback |
//! | [`ocr`] | Tesseract-based OCR and PDF page rasterization |
//! | [`literal`] | Constrained literal parser for LLM structuring replies |
//! | [`structure`] | LLM-assisted document structuring |
//! | [`chunker`] | Structured document → retrieval chunks |
//! | [`embedding`] | Embedding client and vector utilities |
//! | [`llm`] | Chat model client with per-user credential resolution |
//! | [`vectorstore`] | Per-user vector collections |
//! | [`documents`] | Stored document records |
//! | [`retrieve`] | Embedding retrieval, grouping, and ranking |
//! | [`answer`] | Grounded answer generation |
//! | [`chat`] | Chat history |
//! | [`pipeline`] | Ingestion orchestration |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chat;
pub mod chunker;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod extract;
pub mod literal;
pub mod llm;
pub mod migrate;
pub mod ocr;
pub mod pipeline;
pub mod retrieve;
pub mod server;
pub mod structure;
pub mod vectorstore;
