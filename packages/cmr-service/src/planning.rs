//! Term expansion and the staged search plan.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use cmr_domain::terms;
use cmr_providers::llm;

use crate::{Error, Result, router::ModelHandle};

const SYSTEM_PROMPT: &str = "You expand scientific terms with related synonyms or abbreviations. \
	Respond as a JSON list of lowercase strings.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
	CollectionSearch,
	VariableSearch,
	GranuleSearch,
}
impl StageKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::CollectionSearch => "collection_search",
			Self::VariableSearch => "variable_search",
			Self::GranuleSearch => "granule_search",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
	pub query: String,
	pub expanded_terms: Vec<String>,
	pub variable_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
	pub name: String,
	#[serde(rename = "type")]
	pub kind: StageKind,
	pub criteria: Criteria,
	pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPlan {
	pub parallel: bool,
	pub expanded_terms: Vec<String>,
	pub variable_terms: Vec<String>,
	pub stages: Vec<Stage>,
}
impl SearchPlan {
	/// Stage names must be unique, every dependency must name a stage in this plan, and the
	/// dependency graph must be acyclic.
	pub fn check_dependencies(&self) -> Result<()> {
		let mut indegree: HashMap<&str, usize> = HashMap::new();

		for stage in &self.stages {
			if indegree.insert(stage.name.as_str(), stage.depends_on.len()).is_some() {
				return Err(Error::InvalidPlan {
					message: format!("Stage {} is declared more than once.", stage.name),
				});
			}
		}
		for stage in &self.stages {
			if let Some(missing) =
				stage.depends_on.iter().find(|dep| !indegree.contains_key(dep.as_str()))
			{
				return Err(Error::InvalidPlan {
					message: format!("Stage {} depends on unknown stage {missing}.", stage.name),
				});
			}
		}

		let mut ready: Vec<&str> =
			indegree.iter().filter(|(_, count)| **count == 0).map(|(name, _)| *name).collect();
		let mut resolved = HashSet::new();

		while let Some(name) = ready.pop() {
			resolved.insert(name);

			for stage in &self.stages {
				if stage.depends_on.iter().any(|dep| dep == name)
					&& let Some(count) = indegree.get_mut(stage.name.as_str())
				{
					*count -= stage.depends_on.iter().filter(|dep| *dep == name).count();

					if *count == 0 {
						ready.push(stage.name.as_str());
					}
				}
			}
		}

		if resolved.len() != self.stages.len() {
			return Err(Error::InvalidPlan { message: "Stage dependencies form a cycle.".to_string() });
		}

		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Planned {
	pub plan: SearchPlan,
	/// False when no model expansion contributed to the terms.
	pub expanded_by_model: bool,
}

pub struct QueryPlanner {
	model: ModelHandle,
}
impl QueryPlanner {
	pub fn new(model: ModelHandle) -> Self {
		Self { model }
	}

	pub async fn plan(&self, user_query: &str, subqueries: &[String]) -> Result<Planned> {
		let seeds = terms::seed_terms(user_query, subqueries);
		let mut expanded: Vec<String> = seeds
			.iter()
			.map(|seed| seed.trim().to_lowercase())
			.filter(|seed| !seed.is_empty())
			.collect();
		let expansion = self.expand(&seeds).await;
		let expanded_by_model = expansion.is_some();

		if let Some(expansion) = expansion {
			terms::merge_expansion(&mut expanded, expansion);
		}

		terms::with_baseline_synonyms(&mut expanded);

		let expanded_terms = terms::dedup_preserving_order(expanded);
		let variable_terms = terms::variable_terms(&expanded_terms);
		let plan = build_plan(user_query, expanded_terms, variable_terms);

		plan.check_dependencies()?;

		Ok(Planned { plan, expanded_by_model })
	}

	async fn expand(&self, seeds: &[String]) -> Option<Vec<String>> {
		if seeds.is_empty() || !self.model.is_available() {
			return None;
		}

		let messages = [
			serde_json::json!({ "role": "system", "content": SYSTEM_PROMPT }),
			serde_json::json!({ "role": "user", "content": format!("Terms: {}", seeds.join(", ")) }),
		];
		let text = match self.model.ask(&messages).await {
			Ok(text) => text,
			Err(err) => {
				tracing::warn!(error = %err, "Term expansion skipped.");

				return None;
			},
		};
		let reply = llm::parse_json_reply(&text).ok()?;
		let terms = reply.as_array()?;

		Some(terms.iter().filter_map(|term| term.as_str()).map(str::to_string).collect())
	}
}

fn build_plan(user_query: &str, expanded_terms: Vec<String>, variable_terms: Vec<String>) -> SearchPlan {
	let criteria = Criteria {
		query: user_query.to_string(),
		expanded_terms: expanded_terms.clone(),
		variable_terms: variable_terms.clone(),
	};
	let stage = |kind: StageKind, depends_on: &[StageKind]| Stage {
		name: kind.as_str().to_string(),
		kind,
		criteria: criteria.clone(),
		depends_on: depends_on.iter().map(|dep| dep.as_str().to_string()).collect(),
	};
	let stages = vec![
		stage(StageKind::CollectionSearch, &[]),
		stage(StageKind::VariableSearch, &[]),
		stage(StageKind::GranuleSearch, &[StageKind::CollectionSearch]),
	];

	SearchPlan { parallel: true, expanded_terms, variable_terms, stages }
}
