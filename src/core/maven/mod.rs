mod artifact;

pub use artifact::MavenArtifact;

/// Repository used when a library declares none.
pub const MAVEN_CENTRAL: &str = "https://repo1.maven.org/maven2";
