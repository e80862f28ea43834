//! Built-in paraphrase banks for the RPL elicitation prompt and the WEL
//! stance-judge prompt.
//!
//! `heretix-sampler` only knows about template *indices*; this crate is
//! where those indices become actual `system`/`user` prompt text, each
//! tagged with a stable content hash used for cache keys and rotation-offset
//! derivation (`heretix_seed::rotation_offset`/`derive_seed`).

use heretix_types::{PromptBundle, PromptTemplate};
use sha2::{Digest, Sha256};

pub const PROMPT_VERSION: &str = "v1";

fn hash_template(system: &str, user: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system.as_bytes());
    hasher.update(b"\0");
    hasher.update(user.as_bytes());
    let digest = hasher.finalize();
    let mut s = String::with_capacity(digest.len() * 2);
    use std::fmt::Write;
    for b in digest {
        write!(s, "{:02x}", b).expect("writing to String cannot fail");
    }
    s
}

fn template(id: &str, system: &str, user_template: &str, claim: &str) -> PromptTemplate {
    let system = system.to_string();
    let user = user_template.replace("{claim}", claim);
    let hash = hash_template(&system, &user);
    PromptTemplate { id: id.to_string(), system, user, hash }
}

/// RPL paraphrase bank: distinct phrasings of "what's your calibrated
/// probability this claim is true", each asking the same underlying
/// question so aggregate variance measures model uncertainty rather than
/// prompt-wording sensitivity.
const RPL_USER_TEMPLATES: &[(&str, &str)] = &[
    ("rpl-direct", "What is the probability that the following claim is true? Respond with a calibrated probability in [0, 1].\n\nClaim: {claim}"),
    ("rpl-belief", "Assess your degree of belief that this statement is true, as a probability between 0 and 1.\n\nStatement: {claim}"),
    ("rpl-forecaster", "As a careful forecaster, estimate the probability (0 to 1) that this claim holds.\n\nClaim: {claim}"),
    ("rpl-bayesian", "Given your training knowledge, what probability would a well-calibrated Bayesian assign to this claim being true?\n\nClaim: {claim}"),
    ("rpl-fact-check", "Fact-check the following claim and report a calibrated probability (0 to 1) that it is true.\n\nClaim: {claim}"),
];

const RPL_SYSTEM_PROMPT: &str =
    "You are a calibrated probability estimator. Respond only with JSON: \
     {\"probability\": <float 0-1>, \"has_citation_or_url\": <bool>}.";

/// Builds the RPL prompt bundle for a claim: every paraphrase in the bank,
/// rendered with the claim substituted in.
pub fn rpl_bundle(claim: &str) -> PromptBundle {
    let templates = RPL_USER_TEMPLATES
        .iter()
        .map(|(id, user)| template(id, RPL_SYSTEM_PROMPT, user, claim))
        .collect();
    PromptBundle { lens: "rpl".to_string(), templates }
}

const WEL_SYSTEM_PROMPT: &str =
    "You are judging whether a document's content supports a claim. Respond only with JSON: \
     {\"probability\": <float 0-1 that the claim is true given this document>, \"has_citation_or_url\": <bool>}.";

/// Builds the single WEL stance-judge template for one document shard.
/// Unlike RPL, WEL doesn't rotate across paraphrases — every document shard
/// is judged with the same wording so only the *evidence* varies between
/// replicates.
pub fn wel_judge_template(claim: &str, shard_text: &str) -> PromptTemplate {
    let user = format!("Claim: {claim}\n\nDocument excerpt:\n{shard_text}");
    let hash = hash_template(WEL_SYSTEM_PROMPT, &user);
    PromptTemplate { id: "wel-judge".to_string(), system: WEL_SYSTEM_PROMPT.to_string(), user, hash }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpl_bundle_has_one_template_per_bank_entry() {
        let bundle = rpl_bundle("the sky is blue");
        assert_eq!(bundle.templates.len(), RPL_USER_TEMPLATES.len());
        bundle.validate().unwrap();
    }

    #[test]
    fn template_hashes_are_distinct_across_paraphrases() {
        let bundle = rpl_bundle("the sky is blue");
        let hashes: std::collections::HashSet<_> = bundle.templates.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes.len(), bundle.templates.len());
    }

    #[test]
    fn same_claim_yields_same_hashes() {
        let a = rpl_bundle("claim");
        let b = rpl_bundle("claim");
        assert_eq!(a.templates[0].hash, b.templates[0].hash);
    }

    #[test]
    fn different_claims_yield_different_hashes() {
        let a = rpl_bundle("claim A");
        let b = rpl_bundle("claim B");
        assert_ne!(a.templates[0].hash, b.templates[0].hash);
    }

    #[test]
    fn wel_judge_template_embeds_shard_text() {
        let t = wel_judge_template("claim", "some excerpt");
        assert!(t.user.contains("some excerpt"));
    }
}
