//! Prompt-context assembly for the three call kinds.
//!
//! The synthesizer sees analyses in canonical alphabetical agent order so
//! its output is reproducible under fixed seeds; critique prompts carry
//! every analysis with the target marked.

use deliberation::{AgentAnalysis, AgentId, Critique, Synthesis};

/// Analyses formatted for the synthesizer, canonical order.
pub fn format_analyses(analyses: &[AgentAnalysis]) -> String {
    let mut ordered: Vec<&AgentAnalysis> = analyses.iter().collect();
    ordered.sort_by_key(|a| a.agent.as_str());

    let mut out = String::new();
    for analysis in ordered {
        out.push_str(&format!(
            "=== {} (confidence {:.2}) ===\n{}\n",
            analysis.agent.role_title(),
            analysis.confidence,
            analysis.analysis_text
        ));
        if !analysis.key_points.is_empty() {
            out.push_str(&format!("Key points: {}\n", analysis.key_points.join("; ")));
        }
        if !analysis.risks.is_empty() {
            out.push_str(&format!("Risks: {}\n", analysis.risks.join("; ")));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Analyses formatted for a critic, with the target's analysis marked.
pub fn format_analyses_marking(analyses: &[AgentAnalysis], target: AgentId) -> String {
    let mut ordered: Vec<&AgentAnalysis> = analyses.iter().collect();
    ordered.sort_by_key(|a| a.agent.as_str());

    let mut out = String::new();
    for analysis in ordered {
        let marker = if analysis.agent == target {
            " [TARGET]"
        } else {
            ""
        };
        out.push_str(&format!(
            "=== {}{} ===\n{}\n\n",
            analysis.agent.role_title(),
            marker,
            analysis.analysis_text
        ));
    }
    out.trim_end().to_string()
}

/// Critiques formatted for the synthesizer.
pub fn format_critiques(critiques: &[Critique]) -> String {
    if critiques.is_empty() {
        return "(no critiques this iteration)".to_string();
    }
    let mut ordered: Vec<&Critique> = critiques.iter().collect();
    ordered.sort_by_key(|c| (c.from_agent.as_str(), c.to_agent.as_str()));

    let mut out = String::new();
    for critique in ordered {
        out.push_str(&format!(
            "=== {} -> {} (score {:.1}/10) ===\n{}\n",
            critique.from_agent.role_title(),
            critique.to_agent.role_title(),
            critique.score,
            critique.critique_text
        ));
        if !critique.weaknesses.is_empty() {
            out.push_str(&format!("Weaknesses: {}\n", critique.weaknesses.join("; ")));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Critiques aimed at `agent` in a prior iteration, formatted for its
/// refinement prompt.
pub fn format_critiques_of(critiques: &[Critique], agent: AgentId, iteration: u32) -> String {
    let relevant: Vec<&Critique> = critiques
        .iter()
        .filter(|c| c.to_agent == agent && c.iteration == iteration)
        .collect();
    if relevant.is_empty() {
        return "(no critiques were directed at your analysis)".to_string();
    }

    let mut out = String::new();
    for critique in relevant {
        out.push_str(&format!(
            "From {} (score {:.1}/10): {}\n",
            critique.from_agent.role_title(),
            critique.score,
            critique.critique_text
        ));
        if !critique.weaknesses.is_empty() {
            out.push_str(&format!("  Weaknesses: {}\n", critique.weaknesses.join("; ")));
        }
    }
    out.trim_end().to_string()
}

/// Previous synthesis summarized for a refinement prompt.
pub fn format_synthesis(synthesis: &Synthesis) -> String {
    let mut out = format!(
        "Summary: {}\nConsensus level: {:.2}\n",
        synthesis.summary, synthesis.consensus_level
    );
    if !synthesis.conclusions.is_empty() {
        out.push_str("Conclusions:\n");
        for c in &synthesis.conclusions {
            out.push_str(&format!("- {} (p={:.2})\n", c.statement, c.probability));
        }
    }
    if !synthesis.recommendations.is_empty() {
        out.push_str(&format!(
            "Recommendations: {}\n",
            synthesis.recommendations.join("; ")
        ));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deliberation::Conclusion;

    fn analysis(agent: AgentId, text: &str) -> AgentAnalysis {
        AgentAnalysis {
            session_id: "s".into(),
            agent,
            iteration: 1,
            analysis_text: text.into(),
            confidence: 0.8,
            key_points: vec!["kp".into()],
            risks: vec![],
            assumptions: vec![],
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }

    fn critique(from: AgentId, to: AgentId, iteration: u32) -> Critique {
        Critique {
            session_id: "s".into(),
            iteration,
            from_agent: from,
            to_agent: to,
            score: 6.5,
            critique_text: "needs work".into(),
            weaknesses: vec!["thin evidence".into()],
            strengths: vec![],
        }
    }

    #[test]
    fn test_analyses_in_canonical_order() {
        let analyses = vec![
            analysis(AgentId::SystemsArchitect, "arch view"),
            analysis(AgentId::AlternativesGenerator, "alt view"),
        ];
        let formatted = format_analyses(&analyses);
        let alt_pos = formatted.find("Alternatives Generator").unwrap();
        let arch_pos = formatted.find("Systems Architect").unwrap();
        assert!(alt_pos < arch_pos);
    }

    #[test]
    fn test_order_is_stable_regardless_of_input_order() {
        let a = vec![
            analysis(AgentId::FormalAnalyst, "x"),
            analysis(AgentId::LogicalAnalyst, "y"),
        ];
        let b = vec![
            analysis(AgentId::LogicalAnalyst, "y"),
            analysis(AgentId::FormalAnalyst, "x"),
        ];
        assert_eq!(format_analyses(&a), format_analyses(&b));
    }

    #[test]
    fn test_target_is_marked_once() {
        let analyses = vec![
            analysis(AgentId::LogicalAnalyst, "logic"),
            analysis(AgentId::FormalAnalyst, "formal"),
        ];
        let formatted = format_analyses_marking(&analyses, AgentId::FormalAnalyst);
        assert_eq!(formatted.matches("[TARGET]").count(), 1);
        assert!(formatted.contains("Formal Analyst [TARGET]"));
    }

    #[test]
    fn test_empty_critiques_placeholder() {
        assert!(format_critiques(&[]).contains("no critiques"));
    }

    #[test]
    fn test_critiques_of_filters_by_target_and_iteration() {
        let critiques = vec![
            critique(AgentId::LogicalAnalyst, AgentId::FormalAnalyst, 1),
            critique(AgentId::SystemsArchitect, AgentId::FormalAnalyst, 2),
            critique(AgentId::FormalAnalyst, AgentId::LogicalAnalyst, 1),
        ];
        let formatted = format_critiques_of(&critiques, AgentId::FormalAnalyst, 1);
        assert!(formatted.contains("Logical Analyst"));
        assert!(!formatted.contains("Systems Architect"));

        let none = format_critiques_of(&critiques, AgentId::AlternativesGenerator, 1);
        assert!(none.contains("no critiques"));
    }

    #[test]
    fn test_synthesis_formatting() {
        let synthesis = Synthesis {
            session_id: "s".into(),
            iteration: 1,
            summary: "entry is viable".into(),
            conclusions: vec![Conclusion {
                statement: "viable".into(),
                probability: 0.8,
                falsification_condition: None,
            }],
            recommendations: vec!["start small".into()],
            formalized_result: None,
            consensus_level: 0.7,
        };
        let formatted = format_synthesis(&synthesis);
        assert!(formatted.contains("entry is viable"));
        assert!(formatted.contains("p=0.80"));
        assert!(formatted.contains("start small"));
    }
}
