//! Prompt cache - reusable system-instruction segments
//!
//! Static instruction text is split into ordered segments. Segments longer
//! than [`CACHE_MIN_CHARS`] are marked cacheable so a hosted backend can bill
//! repeat reads at its discounted cache rate.

use crate::completion::{TaskType, TokenUsage};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Segments at least this long are marked cacheable
pub const CACHE_MIN_CHARS: usize = 1024;

const BASE_INSTRUCTIONS: &str = "\
You are a clinical documentation assistant working alongside licensed \
clinicians in a primary-care and musculoskeletal practice. You help turn \
structured SOAP notes (Subjective, Objective, Assessment, Plan) into clear, \
accurate clinical text.

Ground rules:
1. Never invent findings, test results, diagnoses, medications or history that \
are not present in the supplied note. If information is missing, say so \
explicitly instead of guessing.
2. You support, and never replace, clinical judgement. Phrase conclusions as \
considerations for the clinician, not as final decisions.
3. Use precise, conventional medical terminology and keep sentences short. \
Prefer lists when enumerating findings or recommendations.
4. Answer in the same language as the clinical note unless asked otherwise. \
Norwegian notes get Norwegian answers (bokmål).
5. Treat all patient data as confidential. Do not repeat identifying details \
that are not needed for the task.
6. Flag anything that could indicate serious pathology (red flags) even when \
the task is not a safety review, and recommend appropriate escalation.
7. Keep the output free of greetings, disclaimers about being an AI, and \
closing remarks. Return only the requested clinical content.
8. When the note is internally inconsistent, point out the inconsistency \
rather than silently resolving it.";

const SAFETY_CONTEXT: &str = "\
SAFETY SCREENING CONTEXT

You are screening for red flags that require urgent action before any further \
documentation work. Consider at least: cauda equina syndrome (saddle \
anaesthesia, new bladder or bowel dysfunction, bilateral neurological deficit), \
malignancy (history of cancer, unexplained weight loss, night pain, age over 50 \
with new pain), infection (fever, immunosuppression, IV drug use), fracture \
(significant trauma, osteoporosis, long-term steroid use), vascular emergencies \
(abdominal aortic aneurysm, cervical arterial dissection, acute limb ischaemia), \
acute coronary syndrome, stroke or TIA, progressive neurological deficit, and \
suicidal ideation.

Begin your answer with exactly one risk level on the first line, using the \
language of the note:
- KRITISK / CRITICAL: immediate referral or emergency care is required
- HØY / HIGH: urgent medical assessment is required before treatment
- MODERAT / MODERATE: treat with caution and monitor closely
- LAV / LOW: no red flags identified

Then list each identified red flag on its own line starting with \"- \". \
If none are found, state that no red flags were found.";

fn task_instructions(task_type: TaskType) -> Option<&'static str> {
    match task_type {
        TaskType::RedFlagAnalysis => Some(
            "Task: perform a red-flag safety screening of the note below. \
             Be conservative: when in doubt, choose the higher risk level.",
        ),
        TaskType::ClinicalSummary => Some(
            "Task: write a concise clinical summary of the note. Cover the \
             presenting complaint, relevant findings, the working assessment \
             and the agreed plan.",
        ),
        TaskType::DifferentialDiagnosis => Some(
            "Task: propose a ranked differential diagnosis. For each \
             candidate give supporting and opposing findings from the note \
             and suggest the next discriminating examination or test.",
        ),
        TaskType::LetterDraft => Some(
            "Task: draft a referral letter to a specialist colleague. Include \
             reason for referral, relevant history and findings, treatment \
             so far and the specific question for the recipient.",
        ),
        TaskType::Synthesis => Some(
            "Task: merge the supplied sections into one coherent clinical \
             narrative without repeating information and without adding new \
             facts.",
        ),
        TaskType::Suggestion => Some(
            "Task: continue the clinician's text with a short, plausible \
             completion. Return only the completion.",
        ),
        TaskType::General => None,
    }
}

/// One system-message segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBlock {
    /// Segment text
    pub text: String,
    /// Whether the backend should cache this segment
    pub cacheable: bool,
}

impl SystemBlock {
    fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let cacheable = text.chars().count() >= CACHE_MIN_CHARS;
        Self { text, cacheable }
    }
}

/// Cache statistics (observability only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Responses that read from the cache
    pub hits: u64,
    /// Responses that had to write the cache
    pub misses: u64,
    /// Hit ratio in `[0, 1]`
    pub hit_rate: f64,
    /// Total tokens read from cache
    pub cache_read_tokens: u64,
    /// Total tokens written to cache
    pub cache_creation_tokens: u64,
    /// Segments built so far
    pub blocks_built: u64,
    /// Segments marked cacheable
    pub cacheable_blocks: u64,
}

/// Builder for cacheable system messages
#[derive(Debug, Default)]
pub struct PromptCache {
    hits: AtomicU64,
    misses: AtomicU64,
    cache_read_tokens: AtomicU64,
    cache_creation_tokens: AtomicU64,
    blocks_built: AtomicU64,
    cacheable_blocks: AtomicU64,
}

impl PromptCache {
    /// Create a new prompt cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered system segments for a task.
    ///
    /// Always starts with the base clinical-assistant segment, then the task
    /// instructions, then the safety context for red-flag tasks, and finally
    /// the caller's own `base_prompt` when non-empty. Unknown or general tasks
    /// get only the base segment plus the caller's text.
    #[must_use]
    pub fn build_cacheable_messages(
        &self,
        task_type: TaskType,
        base_prompt: Option<&str>,
    ) -> Vec<SystemBlock> {
        let mut blocks = vec![SystemBlock::new(BASE_INSTRUCTIONS)];

        if let Some(instructions) = task_instructions(task_type) {
            blocks.push(SystemBlock::new(instructions));
        }
        if task_type.is_safety_task() {
            blocks.push(SystemBlock::new(SAFETY_CONTEXT));
        }
        if let Some(extra) = base_prompt.map(str::trim).filter(|s| !s.is_empty()) {
            blocks.push(SystemBlock::new(extra));
        }

        let cacheable = blocks.iter().filter(|b| b.cacheable).count() as u64;
        self.blocks_built
            .fetch_add(blocks.len() as u64, Ordering::Relaxed);
        self.cacheable_blocks.fetch_add(cacheable, Ordering::Relaxed);

        blocks
    }

    /// Fold a response's cache counters into the statistics
    pub fn observe(&self, usage: &TokenUsage) {
        if usage.cache_read_tokens > 0 {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else if usage.cache_creation_tokens > 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.cache_read_tokens
            .fetch_add(usage.cache_read_tokens, Ordering::Relaxed);
        self.cache_creation_tokens
            .fetch_add(usage.cache_creation_tokens, Ordering::Relaxed);
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            cache_read_tokens: self.cache_read_tokens.load(Ordering::Relaxed),
            cache_creation_tokens: self.cache_creation_tokens.load(Ordering::Relaxed),
            blocks_built: self.blocks_built.load(Ordering::Relaxed),
            cacheable_blocks: self.cacheable_blocks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_segment_is_cacheable() {
        let cache = PromptCache::new();
        let blocks = cache.build_cacheable_messages(TaskType::General, None);

        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].cacheable);
        assert!(blocks[0].text.contains("clinical documentation assistant"));
    }

    #[test]
    fn test_safety_task_adds_safety_context() {
        let cache = PromptCache::new();
        let blocks = cache.build_cacheable_messages(TaskType::RedFlagAnalysis, None);

        assert_eq!(blocks.len(), 3);
        assert!(blocks[1].text.contains("red-flag"));
        assert!(blocks[2].text.contains("KRITISK"));
        assert!(blocks[2].cacheable);
        // Short task instructions stay uncached
        assert!(!blocks[1].cacheable);
    }

    #[test]
    fn test_non_safety_task_has_no_safety_context() {
        let cache = PromptCache::new();
        let blocks =
            cache.build_cacheable_messages(TaskType::ClinicalSummary, Some("Svar kort."));

        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| !b.text.contains("SAFETY SCREENING")));
        assert_eq!(blocks[2].text, "Svar kort.");
        assert!(!blocks[2].cacheable);
    }

    #[test]
    fn test_long_caller_prompt_is_cacheable() {
        let cache = PromptCache::new();
        let long = "x".repeat(CACHE_MIN_CHARS);
        let blocks = cache.build_cacheable_messages(TaskType::General, Some(&long));
        assert!(blocks[1].cacheable);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = PromptCache::new();
        cache.observe(&TokenUsage {
            input_tokens: 2000,
            cache_creation_tokens: 1500,
            ..Default::default()
        });
        cache.observe(&TokenUsage {
            input_tokens: 2000,
            cache_read_tokens: 1500,
            ..Default::default()
        });
        cache.observe(&TokenUsage::new(100, 10));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.cache_read_tokens, 1500);
        assert_eq!(stats.cache_creation_tokens, 1500);
    }
}
