//! The tiered memory subsystem for choir.
//!
//! Five cooperating stores — an ephemeral conversation buffer, the
//! short-term cache, the durable mid-term session store (with an advisory
//! hot-cache collaborator in front of it), the long-term profile/KPI store,
//! and the searchable knowledge base — plus [`MemoryFacade`], the single
//! retrieval/ingest surface the dispatch core talks to.

pub mod buffer;
pub mod facade;
pub mod hot_cache;
pub mod knowledge;
pub mod long_term;
pub mod mid_term;
pub mod short_term;

pub use buffer::ConversationBuffer;
pub use facade::{MemoryFacade, MemoryStats};
pub use hot_cache::{HotCache, InMemoryHotCache, RestHotCache};
pub use knowledge::KnowledgeBase;
pub use long_term::{LongTermMemory, PersonaKpiStore};
pub use mid_term::{MidTermMemory, SessionInfo};
pub use short_term::ShortTermMemory;
