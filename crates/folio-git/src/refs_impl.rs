//! gix-backed ref and rev-parse operations.

use gix::refs::transaction::{Change, LogChange, PreviousValue, RefEdit, RefLog};
use gix::refs::{FullName, Target};

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::objects_impl::{actor_now, from_gix_oid, to_gix_oid};
use crate::types::{GitOid, RefName};

pub fn head_ref(repo: &GixRepo) -> Result<Option<RefName>, GitError> {
    let name = repo.repo.head_name().map_err(GitError::backend)?;
    name.map(|full| {
        RefName::new(&full.as_bstr().to_string()).map_err(|e| GitError::BackendError {
            message: e.to_string(),
        })
    })
    .transpose()
}

/// Reflog identity used when the repository configures no committer.
const FALLBACK_NAME: &str = "folio";
const FALLBACK_EMAIL: &str = "folio@localhost";

pub fn write_ref(
    repo: &GixRepo,
    name: &RefName,
    oid: GitOid,
    log_message: &str,
) -> Result<(), GitError> {
    let committer = match repo.repo.committer() {
        Some(Ok(sig)) => actor_now(&sig.name.to_string(), &sig.email.to_string()),
        _ => actor_now(FALLBACK_NAME, FALLBACK_EMAIL),
    };
    write_ref_as(repo, name, oid, log_message, &committer)
}

/// Point `name` at `oid`, recording `committer` in the reflog instead of
/// whatever identity git config provides.
pub(crate) fn write_ref_as(
    repo: &GixRepo,
    name: &RefName,
    oid: GitOid,
    log_message: &str,
    committer: &gix::actor::Signature,
) -> Result<(), GitError> {
    let edit = RefEdit {
        change: Change::Update {
            log: LogChange {
                mode: RefLog::AndReference,
                force_create_reflog: false,
                message: log_message.into(),
            },
            expected: PreviousValue::Any,
            new: Target::Object(to_gix_oid(oid)),
        },
        name: FullName::try_from(name.as_str()).map_err(GitError::backend)?,
        deref: false,
    };
    let mut time = gix::date::parse::TimeBuf::default();
    repo.repo
        .edit_references_as([edit], Some(committer.to_ref(&mut time)))
        .map_err(GitError::backend)?;
    tracing::trace!(%name, %oid, "ref updated");
    Ok(())
}

pub fn rev_parse(repo: &GixRepo, spec: &str) -> Result<GitOid, GitError> {
    let id = repo
        .repo
        .rev_parse_single(spec)
        .map_err(|e| GitError::NotFound {
            message: format!("rev-parse '{spec}': {e}"),
        })?;
    Ok(from_gix_oid(id.as_ref()))
}

pub fn rev_parse_opt(repo: &GixRepo, spec: &str) -> Result<Option<GitOid>, GitError> {
    // Every rev-parse failure is a resolution failure (unborn HEAD, unknown
    // ref, malformed spec), so all of them read as "absent".
    Ok(repo
        .repo
        .rev_parse_single(spec)
        .ok()
        .map(|id| from_gix_oid(id.as_ref())))
}
