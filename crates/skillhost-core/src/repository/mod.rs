pub mod artifact;
pub mod run;
pub mod skill;

pub use artifact::ArtifactStore;
pub use run::RunRepository;
pub use skill::SkillVersionRepository;
