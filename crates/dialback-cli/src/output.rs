//! Output formatting for the operator commands

use tabled::settings::Style;
use tabled::{Table, Tabled};

use dialback_protocol::messages::{AgentInfo, SessionInfo};

/// Format the agent listing as an ASCII table
pub fn format_agents(agents: &[AgentInfo]) -> String {
    #[derive(Tabled)]
    struct AgentRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "SESSIONS")]
        sessions: usize,
    }

    let rows: Vec<AgentRow> = agents
        .iter()
        .map(|a| AgentRow {
            id: a.id.clone(),
            name: a.name.clone(),
            sessions: a.session_count,
        })
        .collect();

    Table::new(rows).with(Style::sharp()).to_string()
}

/// Format the session listing as an ASCII table
pub fn format_sessions(sessions: &[SessionInfo]) -> String {
    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "SESSION ID")]
        session_id: String,
        #[tabled(rename = "AGENT ID")]
        agent_id: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            session_id: s.session_id.clone(),
            agent_id: s.agent_id.clone(),
        })
        .collect();

    Table::new(rows).with(Style::sharp()).to_string()
}
