//! Agent variants and their catalogue.
//!
//! The catalogue is what the router shows the backend when it asks it to pick
//! a variant, so each entry reads as a short brief rather than a doc comment.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The response strategy selected for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum AgentType {
    Comparison,
    Navigation,
    ProductInfo,
    // Default when nothing else matches, and the target of every failure path.
    #[default]
    Fallback,
}

impl AgentType {
    pub const ALL: [AgentType; 4] = [
        AgentType::Comparison,
        AgentType::Navigation,
        AgentType::ProductInfo,
        AgentType::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Comparison => "Comparison",
            AgentType::Navigation => "Navigation",
            AgentType::ProductInfo => "ProductInfo",
            AgentType::Fallback => "Fallback",
        }
    }

    /// Case-insensitive lookup; anything unrecognised maps to `Fallback`.
    pub fn parse_or_fallback(value: &str) -> AgentType {
        let wanted = value.trim();
        AgentType::ALL
            .into_iter()
            .find(|agent| agent.as_str().eq_ignore_ascii_case(wanted))
            .unwrap_or(AgentType::Fallback)
    }

    pub fn info(&self) -> &'static AgentInfo {
        match self {
            AgentType::Comparison => &COMPARISON_INFO,
            AgentType::Navigation => &NAVIGATION_INFO,
            AgentType::ProductInfo => &PRODUCT_INFO_INFO,
            AgentType::Fallback => &FALLBACK_INFO,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct AgentInfo {
    pub description: &'static str,
    pub capabilities: &'static [&'static str],
    pub sample_user_questions: &'static [&'static str],
}

static NAVIGATION_INFO: AgentInfo = AgentInfo {
    description: "Helps shoppers find their way around the store: directions to specific products, aisles, brands or sections, the way to the checkout, and the fastest route to an item given the current layout.",
    capabilities: &[
        "Locate specific products or brands",
        "Provide aisle numbers",
        "Guide to store sections",
        "Direct to checkout",
        "Suggest the fastest in-store route",
    ],
    sample_user_questions: &[
        "Where can I find shampoo?",
        "What aisle is peanut butter in?",
        "Take me to the dairy section.",
        "Where's the Nike shelf?",
    ],
};

static PRODUCT_INFO_INFO: AgentInfo = AgentInfo {
    description: "Answers detailed questions about a product: features, materials, usage, safety, availability, variants, and return or warranty policies.",
    capabilities: &[
        "Explain product features and usage",
        "Provide material and safety info",
        "Check availability and stock",
        "Show size, color and pack options",
        "Give return and warranty details",
    ],
    sample_user_questions: &[
        "Tell me more about this product.",
        "Is this microwave-safe?",
        "Do you have this in stock?",
        "Does this come with a warranty?",
    ],
};

static COMPARISON_INFO: AgentInfo = AgentInfo {
    description: "Compares products side by side, highlights differences, suggests cheaper alternatives and recommends similar items for the shopper's needs.",
    capabilities: &[
        "Compare products side by side",
        "Suggest cheaper alternatives",
        "Recommend similar items",
        "Match products to specific needs",
    ],
    sample_user_questions: &[
        "What's the difference between this and the other one?",
        "Is there a cheaper version of this?",
        "Which one is better for sensitive skin?",
    ],
};

static FALLBACK_INFO: AgentInfo = AgentInfo {
    description: "Handles anything that is not clearly navigation, product information or comparison: unclear, general or off-topic requests. Asks clarifying questions and steers the shopper toward help.",
    capabilities: &[
        "Handle unclear or general questions",
        "Ask clarifying follow-up questions",
        "Redirect to appropriate help",
    ],
    sample_user_questions: &[
        "Can you help me?",
        "What do you recommend?",
        "Do you have any deals right now?",
    ],
};

/// Formats the whole catalogue for the routing prompt.
pub fn render_catalogue() -> String {
    AgentType::ALL
        .iter()
        .map(|agent| {
            let info = agent.info();
            format!(
                "{}:\nDescription: {}\nCapabilities:\n- {}\nSample user questions:\n- {}",
                agent,
                info.description,
                info.capabilities.join("\n- "),
                info.sample_user_questions.join("\n- ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
