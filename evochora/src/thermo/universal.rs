// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The data-driven universal policy.
//!
//! Cost resolution walks a deterministic chain: instruction override (by
//! exact name, then family pattern) → write or read sub-rules (by
//! molecule type, value-specific first) → the override's base → the
//! global default pair. A rule can price absolutely, as a per-mille
//! fraction of the target molecule's value or the organism's ER, or both
//! added together.

use std::collections::BTreeMap;

use ahash::AHashMap;
use serde::Deserialize;

use evochora_shared::molecule::MoleculeKind;

use super::{CostContext, CostDelta, OwnerRelation, ThermodynamicPolicy};
use crate::isa::ConflictClass;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UniversalPolicyConfig {
    /// The pair charged when no rule matches.
    pub default_rule: CostPair,
    pub overrides: Vec<InstructionOverride>,
}

impl Default for UniversalPolicyConfig {
    fn default() -> Self {
        UniversalPolicyConfig {
            default_rule: CostPair::default(),
            overrides: Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CostPair {
    pub energy: u64,
    pub entropy: u64,
}

impl Default for CostPair {
    fn default() -> Self {
        CostPair {
            energy: 1,
            entropy: 0,
        }
    }
}

impl From<CostPair> for CostDelta {
    fn from(pair: CostPair) -> CostDelta {
        CostDelta {
            energy: pair.energy,
            entropy: pair.entropy,
        }
    }
}

/// Per-instruction (or per-family) cost override.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstructionOverride {
    /// An exact instruction name (`"POKE"`) or a family pattern
    /// (`"environment.*"`). Exact names take precedence.
    pub pattern: String,
    #[serde(default)]
    pub base: Option<CostRule>,
    /// Applied to write instructions, keyed by the written molecule's
    /// type.
    #[serde(default)]
    pub write_rules: BTreeMap<MoleculeKind, TypeRule>,
    /// Applied to read instructions, keyed by the owner relation, then
    /// the read molecule's type.
    #[serde(default)]
    pub read_rules: BTreeMap<OwnerRelation, BTreeMap<MoleculeKind, TypeRule>>,
}

/// Rules for one molecule type: a value-specific table consulted first,
/// then the type default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TypeRule {
    pub rule: Option<CostRule>,
    pub values: BTreeMap<i32, CostRule>,
}

impl TypeRule {
    fn select(&self, value: i32) -> Option<&CostRule> {
        self.values.get(&value).or(self.rule.as_ref())
    }
}

/// What the per-mille fractions of a rule are taken from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermilleBase {
    /// The absolute value of the target molecule's payload.
    #[default]
    MoleculeValue,
    /// The acting organism's energy register.
    EnergyRegister,
}

/// One resolvable cost rule. Absolute parts and per-mille parts add; a
/// component specified by neither falls back to the default pair.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CostRule {
    pub energy: Option<i64>,
    pub entropy: Option<i64>,
    pub energy_permille: Option<i64>,
    pub entropy_permille: Option<i64>,
    pub permille_base: PermilleBase,
}

impl CostRule {
    fn resolve(&self, ctx: &CostContext<'_>, fallback: CostPair) -> CostDelta {
        let base_amount = match self.permille_base {
            PermilleBase::MoleculeValue => ctx
                .target
                .as_ref()
                .map_or(0, |t| (t.molecule.value() as i64).abs()),
            PermilleBase::EnergyRegister => ctx.organism_energy as i64,
        };
        let component = |absolute: Option<i64>, permille: Option<i64>, fallback: u64| -> u64 {
            if absolute.is_none() && permille.is_none() {
                return fallback;
            }
            let total = absolute.unwrap_or(0) + permille.unwrap_or(0) * base_amount / 1000;
            total.max(0) as u64
        };
        CostDelta {
            energy: component(self.energy, self.energy_permille, fallback.energy),
            entropy: component(self.entropy, self.entropy_permille, fallback.entropy),
        }
    }
}

pub struct UniversalPolicy {
    config: UniversalPolicyConfig,
    exact: AHashMap<String, usize>,
    families: Vec<(String, usize)>,
}

impl UniversalPolicy {
    pub fn new(config: UniversalPolicyConfig) -> UniversalPolicy {
        let mut exact = AHashMap::new();
        let mut families = Vec::new();
        for (index, over) in config.overrides.iter().enumerate() {
            match over.pattern.strip_suffix(".*") {
                Some(family) => families.push((family.to_string(), index)),
                None => {
                    exact.entry(over.pattern.clone()).or_insert(index);
                }
            }
        }
        UniversalPolicy {
            config,
            exact,
            families,
        }
    }

    fn find_override(&self, ctx: &CostContext<'_>) -> Option<&InstructionOverride> {
        if let Some(index) = self.exact.get(ctx.spec.name) {
            return Some(&self.config.overrides[*index]);
        }
        let family = ctx.spec.family_name();
        self.families
            .iter()
            .find(|(prefix, _)| prefix == family)
            .map(|(_, index)| &self.config.overrides[*index])
    }
}

impl ThermodynamicPolicy for UniversalPolicy {
    fn cost(&self, ctx: &CostContext<'_>) -> CostDelta {
        let base = self.config.default_rule;
        let Some(over) = self.find_override(ctx) else {
            return base.into();
        };

        let sub_rule = match (&ctx.target, ctx.spec.conflict) {
            (Some(target), ConflictClass::WorldWrite) => over
                .write_rules
                .get(&target.molecule.kind())
                .and_then(|tr| tr.select(target.molecule.value())),
            (Some(target), _) => ctx.relation().and_then(|relation| {
                over.read_rules
                    .get(&relation)
                    .and_then(|by_kind| by_kind.get(&target.molecule.kind()))
                    .and_then(|tr| tr.select(target.molecule.value()))
            }),
            (None, _) => None,
        };

        match sub_rule.or(over.base.as_ref()) {
            Some(rule) => rule.resolve(ctx, base),
            None => base.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use evochora_shared::molecule::Molecule;

    use super::*;
    use crate::isa::standard_registry;
    use crate::thermo::TargetCell;

    fn config(json: &str) -> UniversalPolicyConfig {
        serde_json::from_str(json).unwrap()
    }

    fn nop_ctx(spec_name: &str) -> CostContext<'static> {
        let id = crate::isa::standard::opcode_by_name(spec_name).unwrap();
        CostContext {
            spec: standard_registry().get(id).unwrap(),
            organism_id: 1,
            organism_energy: 200,
            target: None,
            operands: &[],
        }
    }

    #[test]
    fn base_pair_applies_without_overrides() {
        let policy = UniversalPolicy::new(UniversalPolicyConfig::default());
        let cost = policy.cost(&nop_ctx("NOP"));
        assert_eq!(cost, CostDelta { energy: 1, entropy: 0 });
    }

    #[test]
    fn exact_name_beats_family_pattern() {
        let policy = UniversalPolicy::new(config(
            r#"{
                "default_rule": { "energy": 1, "entropy": 0 },
                "overrides": [
                    { "pattern": "arithmetic.*", "base": { "energy": 7 } },
                    { "pattern": "ADDR", "base": { "energy": 3 } }
                ]
            }"#,
        ));
        assert_eq!(policy.cost(&nop_ctx("ADDR")).energy, 3);
        assert_eq!(policy.cost(&nop_ctx("SUBR")).energy, 7);
        assert_eq!(policy.cost(&nop_ctx("NOP")).energy, 1);
    }

    #[test]
    fn write_rules_select_by_type_then_value() {
        let policy = UniversalPolicy::new(config(
            r#"{
                "overrides": [{
                    "pattern": "POKE",
                    "base": { "energy": 2 },
                    "write-rules": {
                        "Data": {
                            "rule": { "energy": 10 },
                            "values": { "7": { "energy": 99 } }
                        }
                    }
                }]
            }"#,
        ));

        let id = crate::isa::standard::opcode_by_name("POKE").unwrap();
        let spec = standard_registry().get(id).unwrap();
        let coord = evochora_shared::coord::Coord(vec![0]);
        let cost_for = |value: i32| {
            let molecule =
                Molecule::new(MoleculeKind::Data, value, 0).unwrap();
            policy.cost(&CostContext {
                spec,
                organism_id: 1,
                organism_energy: 100,
                target: Some(TargetCell {
                    coord: &coord,
                    molecule,
                    owner: 0,
                }),
                operands: &[],
            })
        };
        assert_eq!(cost_for(7).energy, 99);
        assert_eq!(cost_for(8).energy, 10);

        // An ENERGY write has no type rule and falls back to the override
        // base.
        let molecule = Molecule::new(MoleculeKind::Energy, 5, 0).unwrap();
        let cost = policy.cost(&CostContext {
            spec,
            organism_id: 1,
            organism_energy: 100,
            target: Some(TargetCell {
                coord: &coord,
                molecule,
                owner: 0,
            }),
            operands: &[],
        });
        assert_eq!(cost.energy, 2);
    }

    #[test]
    fn read_rules_distinguish_owner_relations() {
        let policy = UniversalPolicy::new(config(
            r#"{
                "overrides": [{
                    "pattern": "PEEK",
                    "read-rules": {
                        "foreign": { "Data": { "rule": { "energy": 20 } } },
                        "own": { "Data": { "rule": { "energy": 2 } } }
                    }
                }]
            }"#,
        ));
        let id = crate::isa::standard::opcode_by_name("PEEK").unwrap();
        let spec = standard_registry().get(id).unwrap();
        let coord = evochora_shared::coord::Coord(vec![0]);
        let molecule = Molecule::new(MoleculeKind::Data, 1, 0).unwrap();
        let cost_for = |owner: u64| {
            policy.cost(&CostContext {
                spec,
                organism_id: 5,
                organism_energy: 100,
                target: Some(TargetCell {
                    coord: &coord,
                    molecule,
                    owner,
                }),
                operands: &[],
            })
        };
        assert_eq!(cost_for(9).energy, 20);
        assert_eq!(cost_for(5).energy, 2);
        // Unowned has no rule: the default pair applies.
        assert_eq!(cost_for(0).energy, 1);
    }

    #[test]
    fn permille_fractions_truncate_toward_zero_and_add_to_absolutes() {
        // Molecule-value base: 150permille of 13 is 1.95, truncating to 1;
        // added to the absolute part of 2 gives 3.
        let policy = UniversalPolicy::new(config(
            r#"{
                "overrides": [{
                    "pattern": "HARVEST",
                    "write-rules": {
                        "Energy": {
                            "rule": { "energy": 2, "energy-permille": 150 }
                        }
                    }
                }]
            }"#,
        ));
        let id = crate::isa::standard::opcode_by_name("HARVEST").unwrap();
        let spec = standard_registry().get(id).unwrap();
        let coord = evochora_shared::coord::Coord(vec![0]);
        let molecule = Molecule::new(MoleculeKind::Energy, 13, 0).unwrap();
        let cost = policy.cost(&CostContext {
            spec,
            organism_id: 1,
            organism_energy: 100,
            target: Some(TargetCell {
                coord: &coord,
                molecule,
                owner: 0,
            }),
            operands: &[],
        });
        assert_eq!(cost.energy, 3);

        // ER base: 50permille of 100.
        let policy = UniversalPolicy::new(config(
            r#"{
                "overrides": [{
                    "pattern": "NOP",
                    "base": {
                        "energy-permille": 50,
                        "permille-base": "energy-register"
                    }
                }]
            }"#,
        ));
        let mut ctx = nop_ctx("NOP");
        ctx.organism_energy = 100;
        assert_eq!(policy.cost(&ctx).energy, 5);
    }
}
