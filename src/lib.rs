pub mod artifact;
pub mod connector;
pub mod error;
pub mod graph;
pub mod http;
pub mod repository;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod update;
pub mod version;

pub use artifact::{Artifact, Item, Metadata};
pub use error::{CheckError, NoConnectorError, ResolutionError, TransferError};
pub use graph::{
    DependencyGraph, DependencyNode, GraphTransformer, NearestVersionResolver, NodeId,
    ResolveError, TransformContext,
};
pub use repository::{ChecksumPolicy, LocalRepository, RemoteRepository, RepositoryPolicy};
pub use resolver::{ArtifactRequest, ArtifactResult, MetadataRequest, MetadataResult, Resolver};
pub use session::{Session, SessionConfig};
pub use update::{UpdateCheck, UpdateCheckManager, UpdatePolicy};
