use crate::conversation::ConversationStore;
use crate::events::Modality;
use crate::store::StoreContext;
use crate::tools::ToolBridge;
use std::sync::Arc;
use uuid::Uuid;

/// Everything one conversation's turns share.
///
/// Created once per caller connection and passed to every component; nothing
/// here is reachable from another conversation.
#[derive(Clone)]
pub struct ConversationContext {
    pub id: Uuid,
    pub store: StoreContext,
    pub conversation: ConversationStore,
    pub bridge: Arc<ToolBridge>,
    pub modality: Modality,
}

impl ConversationContext {
    pub fn new(store: StoreContext, bridge: Arc<ToolBridge>, modality: Modality) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            conversation: ConversationStore::new(),
            bridge,
            modality,
        }
    }
}
