
pub mod splitter;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::config::ChunkingConfig;
use crate::{PortfolioError, Result};

/// A bounded, retrievable unit of source text with provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Provenance attached to every chunk. Optional keys are the
/// natural-language filters for sub-records (a job's company, a project's
/// name, a degree's institution).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMetadata {
    pub source: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub section: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
}

impl ChunkMetadata {
    fn new(source: &str, doc_type: &str, section: String) -> Self {
        Self {
            source: source.to_string(),
            doc_type: doc_type.to_string(),
            section,
            company: None,
            project_name: None,
            institution: None,
        }
    }
}

/// Structured knowledge source, deserialized from `portfolio.json`.
///
/// Every field is optional so a sparse portfolio still loads, but a field
/// that is present and malformed fails the whole parse rather than being
/// dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioSource {
    pub personal_info: Option<PersonalInfo>,
    pub summary: Option<String>,
    pub skills: Option<BTreeMap<String, Vec<String>>>,
    pub work_experience: Option<Vec<WorkEntry>>,
    pub projects: Option<Vec<ProjectEntry>>,
    pub education: Option<Vec<EducationEntry>>,
    pub certifications: Option<Vec<String>>,
    pub languages: Option<Vec<LanguageEntry>>,
    pub interests: Option<Vec<String>>,
    pub availability: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonalInfo {
    pub name: String,
    pub title: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkEntry {
    pub company: String,
    pub position: Option<String>,
    pub period: Option<String>,
    pub description: Option<String>,
    pub achievements: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
    pub description: Option<String>,
    pub technologies: Option<Vec<String>>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EducationEntry {
    pub institution: String,
    pub degree: Option<String>,
    pub period: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageEntry {
    pub language: String,
    pub proficiency: Option<String>,
}

/// Load the knowledge source at `path` and format it into chunks ready for
/// embedding. A `.json` extension selects the structured formatter;
/// anything else is treated as flat text.
#[inline]
pub fn load_chunks(path: &Path, chunking: ChunkingConfig) -> Result<Vec<Chunk>> {
    if !path.exists() {
        return Err(PortfolioError::NotFound(path.display().to_string()));
    }

    info!("Loading knowledge source from {}", path.display());
    let content = fs::read_to_string(path)?;
    let source_name = path.display().to_string();

    let structured = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let chunks = if structured {
        let source: PortfolioSource = serde_json::from_str(&content)
            .map_err(|e| PortfolioError::Parse(e.to_string()))?;
        format_structured(&source, &source_name, chunking)
    } else {
        format_flat_text(&content, &source_name, chunking)
    };

    info!("Formatted {} chunks from {}", chunks.len(), source_name);
    Ok(chunks)
}

/// Flat text: the whole file is one unit, split into bounded pieces.
fn format_flat_text(content: &str, source: &str, chunking: ChunkingConfig) -> Vec<Chunk> {
    let pieces = splitter::split_text(content, chunking.chunk_size, chunking.chunk_overlap);
    debug!("Flat source split into {} pieces", pieces.len());

    pieces
        .into_iter()
        .filter(|text| !text.trim().is_empty())
        .enumerate()
        .map(|(i, text)| Chunk {
            text,
            metadata: ChunkMetadata::new(source, "portfolio", format!("portfolio_{i}")),
        })
        .collect()
}

/// Structured source: one candidate chunk per section or sub-record,
/// rendered as labeled lines. Candidates above the size limit are split
/// further, every piece inheriting the parent's metadata.
fn format_structured(
    source: &PortfolioSource,
    source_name: &str,
    chunking: ChunkingConfig,
) -> Vec<Chunk> {
    let mut candidates = Vec::new();

    if let Some(info) = &source.personal_info {
        candidates.push(Chunk {
            text: render_personal_info(info),
            metadata: ChunkMetadata::new(source_name, "personal_info", "personal_info".to_string()),
        });
    }

    if let Some(summary) = &source.summary {
        candidates.push(Chunk {
            text: format!("Ringkasan: {summary}"),
            metadata: ChunkMetadata::new(source_name, "personal_info", "summary".to_string()),
        });
    }

    if let Some(skills) = &source.skills {
        for (category, items) in skills {
            candidates.push(Chunk {
                text: format!("Keahlian {category}: {}", items.join(", ")),
                metadata: ChunkMetadata::new(
                    source_name,
                    "skills",
                    format!("skills_{}", slugify(category)),
                ),
            });
        }
    }

    if let Some(jobs) = &source.work_experience {
        for (i, job) in jobs.iter().enumerate() {
            let mut metadata =
                ChunkMetadata::new(source_name, "work_experience", format!("work_experience_{i}"));
            metadata.company = Some(job.company.clone());
            candidates.push(Chunk {
                text: render_work_entry(job),
                metadata,
            });
        }
    }

    if let Some(projects) = &source.projects {
        for (i, project) in projects.iter().enumerate() {
            let mut metadata = ChunkMetadata::new(source_name, "project", format!("project_{i}"));
            metadata.project_name = Some(project.name.clone());
            candidates.push(Chunk {
                text: render_project_entry(project),
                metadata,
            });
        }
    }

    if let Some(entries) = &source.education {
        for (i, entry) in entries.iter().enumerate() {
            let mut metadata =
                ChunkMetadata::new(source_name, "education", format!("education_{i}"));
            metadata.institution = Some(entry.institution.clone());
            candidates.push(Chunk {
                text: render_education_entry(entry),
                metadata,
            });
        }
    }

    if let Some(certs) = &source.certifications {
        candidates.push(Chunk {
            text: format!("Sertifikasi: {}", certs.join("; ")),
            metadata: ChunkMetadata::new(source_name, "certifications", "certifications".to_string()),
        });
    }

    if let Some(languages) = &source.languages {
        let rendered: Vec<String> = languages
            .iter()
            .map(|entry| match &entry.proficiency {
                Some(level) => format!("{} ({level})", entry.language),
                None => entry.language.clone(),
            })
            .collect();
        candidates.push(Chunk {
            text: format!("Bahasa: {}", rendered.join("; ")),
            metadata: ChunkMetadata::new(source_name, "languages", "languages".to_string()),
        });
    }

    if let Some(interests) = &source.interests {
        candidates.push(Chunk {
            text: format!("Minat: {}", interests.join(", ")),
            metadata: ChunkMetadata::new(source_name, "interests", "interests".to_string()),
        });
    }

    if let Some(availability) = &source.availability {
        candidates.push(Chunk {
            text: format!("Ketersediaan: {availability}"),
            metadata: ChunkMetadata::new(source_name, "availability", "availability".to_string()),
        });
    }

    split_oversized(candidates, chunking)
}

/// Sub-divide any candidate whose rendered text exceeds the chunk size.
/// Splitting never crosses candidates; pieces keep the parent metadata with
/// an index suffix so sections stay unique.
fn split_oversized(candidates: Vec<Chunk>, chunking: ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        if splitter::text_len(&candidate.text) <= chunking.chunk_size {
            chunks.push(candidate);
            continue;
        }

        let pieces = splitter::split_text(
            &candidate.text,
            chunking.chunk_size,
            chunking.chunk_overlap,
        );
        debug!(
            "Section {} split into {} pieces",
            candidate.metadata.section,
            pieces.len()
        );
        for (i, text) in pieces.into_iter().enumerate() {
            let mut metadata = candidate.metadata.clone();
            metadata.section = format!("{}_{i}", candidate.metadata.section);
            chunks.push(Chunk { text, metadata });
        }
    }

    chunks
}

fn render_personal_info(info: &PersonalInfo) -> String {
    let mut lines = vec![format!("Nama: {}", info.name)];
    push_labeled(&mut lines, "Jabatan", info.title.as_deref());
    push_labeled(&mut lines, "Lokasi", info.location.as_deref());
    push_labeled(&mut lines, "Email", info.email.as_deref());
    push_labeled(&mut lines, "LinkedIn", info.linkedin.as_deref());
    push_labeled(&mut lines, "GitHub", info.github.as_deref());
    push_labeled(&mut lines, "Website", info.website.as_deref());
    lines.join("\n")
}

fn render_work_entry(job: &WorkEntry) -> String {
    let mut lines = vec![format!("Perusahaan: {}", job.company)];
    push_labeled(&mut lines, "Posisi", job.position.as_deref());
    push_labeled(&mut lines, "Periode", job.period.as_deref());
    push_labeled(&mut lines, "Deskripsi", job.description.as_deref());
    if let Some(achievements) = &job.achievements {
        lines.push(format!("Pencapaian: {}", achievements.join("; ")));
    }
    lines.join("\n")
}

fn render_project_entry(project: &ProjectEntry) -> String {
    let mut lines = vec![format!("Proyek: {}", project.name)];
    push_labeled(&mut lines, "Deskripsi", project.description.as_deref());
    if let Some(technologies) = &project.technologies {
        lines.push(format!("Teknologi: {}", technologies.join(", ")));
    }
    push_labeled(&mut lines, "Link", project.link.as_deref());
    lines.join("\n")
}

fn render_education_entry(entry: &EducationEntry) -> String {
    let mut lines = vec![format!("Institusi: {}", entry.institution)];
    push_labeled(&mut lines, "Gelar", entry.degree.as_deref());
    push_labeled(&mut lines, "Periode", entry.period.as_deref());
    lines.join("\n")
}

fn push_labeled(lines: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(value) = value {
        lines.push(format!("{label}: {value}"));
    }
}

fn slugify(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
