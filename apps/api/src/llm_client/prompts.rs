// Skill-classification prompt templates. All prompts for the classifier
// signal live here.

pub const SKILL_CLASSIFY_SYSTEM: &str = "\
You are a precise skill-taxonomy classifier for a recruitment platform. \
Given a single candidate token observed in résumés or job descriptions, judge \
whether it denotes a real professional skill. \
You MUST respond with valid JSON only — no markdown fences, no explanations. \
Be conservative: ordinary English words, names, and section headings are NOT \
skills and must receive low confidence.";

pub const SKILL_CLASSIFY_PROMPT: &str = r#"Classify the following candidate token.

TOKEN:
{candidate_text}

OUTPUT SCHEMA (return exactly this structure):
{
  "confidence": 0.0,   // probability in [0,1] that the token is a professional skill
  "category": "string" // one of: programming, frameworks, tools, data_science,
                       // devops, infrastructure, clinical_research, regulatory_affairs,
                       // quality_assurance, soft_skills, other
}"#;
