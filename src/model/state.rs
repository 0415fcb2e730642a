//! Labeled hidden states shared by the HMM variants: `Z`ero,
//! `L`ow, `M`edium, `H`igh, and the differential-calling `I`ncreased /
//! `D`ecreased pair.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateLabel {
    Zero,
    Low,
    Medium,
    High,
    Increased,
    Decreased,
}

impl StateLabel {
    pub fn zlh() -> Vec<StateLabel> {
        vec![StateLabel::Zero, StateLabel::Low, StateLabel::High]
    }

    pub fn zlmh() -> Vec<StateLabel> {
        vec![
            StateLabel::Zero,
            StateLabel::Low,
            StateLabel::Medium,
            StateLabel::High,
        ]
    }

    pub fn zlhid() -> Vec<StateLabel> {
        vec![
            StateLabel::Zero,
            StateLabel::Low,
            StateLabel::High,
            StateLabel::Increased,
            StateLabel::Decreased,
        ]
    }

    /// Plain `k`-state labels without zero-inflation: `Low` for state 0
    /// (the baseline) and `High` for every subsequent state, which is
    /// all the state-flip sanitizer and null-hypothesis selection need
    /// to know ("is this an enriched state or not").
    pub fn plain_k(k: usize) -> Vec<StateLabel> {
        (0..k)
            .map(|i| if i == 0 { StateLabel::Low } else { StateLabel::High })
            .collect()
    }
}

/// The default null hypothesis: every state that is not itself a
/// positive call, declared per model family.
///
/// For the plain peak-calling variants (`ZLH`, `ZLMH`, `HMM_k`) the only
/// positive call is `High`; `Zero`/`Low`/`Medium` are background.
///
/// For the differential `ZLHID` variant, `High` is *not* itself a
/// differential call — both conditions equally enriched is not a
/// difference — so the null instead covers `Zero`/`Low`/`High` and only
/// `Increased`/`Decreased` count as signal: peaks are classified
/// `high->low` vs `low->high` by comparing `D`/`I` posteriors, which
/// only makes sense if those are the two states outside the null.
pub fn default_null_states(labels: &[StateLabel]) -> Vec<usize> {
    let is_differential =
        labels.iter().any(|l| matches!(l, StateLabel::Increased | StateLabel::Decreased));
    labels
        .iter()
        .enumerate()
        .filter(|(_, l)| {
            if is_differential {
                !matches!(l, StateLabel::Increased | StateLabel::Decreased)
            } else {
                !matches!(l, StateLabel::High)
            }
        })
        .map(|(i, _)| i)
        .collect()
}
