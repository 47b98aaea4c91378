// Route modules for Courier Server
pub mod files; // Attachment retrieval
pub mod websocket; // Real-time relay protocol
