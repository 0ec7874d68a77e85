//! Installs the generic sandboxed handlers onto an [`RpcRegistry`]. Shared
//! verbatim by the machine connector (which exposes them under the machine
//! scope) and every session connector.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use beacon_handlers::response;
use beacon_handlers::{bash, fs, skills, slash_commands, subprocess, uploads, HandlerError};
use beacon_rpc::{BoxFuture, BoxedHandler, RpcRegistry};
use beacon_sandbox::WorkingRoot;

/// Wrap a synchronous handler body into the registry's boxed-handler shape.
fn handler_sync<A, T, F>(f: F) -> BoxedHandler
where
    A: DeserializeOwned + Send + 'static,
    T: Serialize,
    F: Fn(A) -> Result<T, HandlerError> + Send + Sync + 'static,
{
    Box::new(move |params: Value| {
        let result = serde_json::from_value::<A>(params)
            .map_err(|e| HandlerError::InvalidInput(e.to_string()))
            .and_then(|args| f(args));
        Box::pin(async move { Ok(response::envelope(result)) }) as BoxFuture<'static, _>
    })
}

/// Wrap an asynchronous handler body into the registry's boxed-handler
/// shape. `f` must itself own everything its returned future needs (e.g. by
/// cloning an `Arc` inside its body) since the future it returns has to
/// outlive the synchronous call that produced it.
fn handler_async<A, T, Fut, F>(f: F) -> BoxedHandler
where
    A: DeserializeOwned + Send + 'static,
    T: Serialize,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
{
    Box::new(move |params: Value| match serde_json::from_value::<A>(params) {
        Ok(args) => {
            let fut = f(args);
            Box::pin(async move { Ok(response::envelope(fut.await)) }) as BoxFuture<'static, _>
        },
        Err(e) => {
            let result: Result<T, HandlerError> = Err(HandlerError::InvalidInput(e.to_string()));
            Box::pin(async move { Ok(response::envelope(result)) })
        },
    })
}

/// Register `path-exists`, `listDirectory`, `getDirectoryTree`, `readFile`,
/// `writeFile`, `bash`, `ripgrep`, `difftastic`, `git-status`,
/// `git-diff-numstat`, `git-diff-file`, `listSlashCommands`, and
/// `listSkills` on `rpc`, sandboxed to `root` and resolving `~` against
/// `home`.
pub async fn install_sandboxed_handlers(rpc: &RpcRegistry, root: Arc<WorkingRoot>, home: Arc<PathBuf>) {
    let home_for_exists = Arc::clone(&home);
    rpc.register(
        "path-exists",
        handler_sync(move |args: fs::PathExistsArgs| Ok(fs::path_exists(args, &home_for_exists))),
    )
    .await;

    let root_for_list = Arc::clone(&root);
    rpc.register(
        "listDirectory",
        handler_sync(move |args: fs::ListDirectoryArgs| fs::list_directory(args, &root_for_list)),
    )
    .await;

    let root_for_tree = Arc::clone(&root);
    rpc.register(
        "getDirectoryTree",
        handler_sync(move |args: fs::GetDirectoryTreeArgs| fs::get_directory_tree(args, &root_for_tree)),
    )
    .await;

    let root_for_read = Arc::clone(&root);
    rpc.register(
        "readFile",
        handler_sync(move |args: fs::ReadFileArgs| fs::read_file(args, &root_for_read)),
    )
    .await;

    let root_for_write = Arc::clone(&root);
    rpc.register(
        "writeFile",
        handler_sync(move |args: fs::WriteFileArgs| fs::write_file(args, &root_for_write)),
    )
    .await;

    let root_for_bash = Arc::clone(&root);
    rpc.register(
        "bash",
        handler_async(move |args: bash::BashArgs| {
            let root = Arc::clone(&root_for_bash);
            async move { bash::bash(args, &root).await }
        }),
    )
    .await;

    let root_for_rg = Arc::clone(&root);
    rpc.register(
        "ripgrep",
        handler_async(move |args: subprocess::SubprocessArgs| {
            let root = Arc::clone(&root_for_rg);
            async move { subprocess::ripgrep(args, &root).await }
        }),
    )
    .await;

    let root_for_difft = Arc::clone(&root);
    rpc.register(
        "difftastic",
        handler_async(move |args: subprocess::SubprocessArgs| {
            let root = Arc::clone(&root_for_difft);
            async move { subprocess::difftastic(args, &root).await }
        }),
    )
    .await;

    let root_for_status = Arc::clone(&root);
    rpc.register(
        "git-status",
        handler_async(move |args: subprocess::GitArgs| {
            let root = Arc::clone(&root_for_status);
            async move { subprocess::git_status(args, &root).await }
        }),
    )
    .await;

    let root_for_numstat = Arc::clone(&root);
    rpc.register(
        "git-diff-numstat",
        handler_async(move |args: subprocess::GitArgs| {
            let root = Arc::clone(&root_for_numstat);
            async move { subprocess::git_diff_numstat(args, &root).await }
        }),
    )
    .await;

    let root_for_diff_file = Arc::clone(&root);
    rpc.register(
        "git-diff-file",
        handler_async(move |args: subprocess::GitDiffFileArgs| {
            let root = Arc::clone(&root_for_diff_file);
            async move { subprocess::git_diff_file(args, &root).await }
        }),
    )
    .await;

    let home_for_slash = Arc::clone(&home);
    rpc.register(
        "listSlashCommands",
        handler_sync(move |args: slash_commands::ListSlashCommandsArgs| {
            slash_commands::list_slash_commands(args, &home_for_slash)
        }),
    )
    .await;

    let root_for_skills = Arc::clone(&root);
    rpc.register(
        "listSkills",
        handler_sync(move |_args: Value| skills::list_skills(&root_for_skills)),
    )
    .await;
}

/// Params for `uploadFile`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadFileArgs {
    filename: String,
    content: String,
}

/// Params for `uploadMultipartStart`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultipartStartArgs {
    filename: String,
}

/// Params for `uploadMultipartChunk`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultipartChunkArgs {
    upload_id: beacon_core::UploadId,
    chunk: String,
}

/// Params shared by `uploadMultipartComplete`/`uploadMultipartAbort`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultipartIdArgs {
    upload_id: beacon_core::UploadId,
}

/// Params for `deleteUpload`.
#[derive(Debug, serde::Deserialize)]
struct DeleteUploadArgs {
    path: String,
}

/// Register the upload-staging endpoints on a session's `rpc` registry,
/// keyed to `session_key` within `uploads`'s shared blobs root.
pub async fn install_upload_handlers(
    rpc: &RpcRegistry,
    uploads: Arc<uploads::UploadRegistry>,
    session_key: Arc<String>,
) {
    let (u, k) = (Arc::clone(&uploads), Arc::clone(&session_key));
    rpc.register(
        "uploadFile",
        handler_async(move |args: UploadFileArgs| {
            let (u, k) = (Arc::clone(&u), Arc::clone(&k));
            async move { u.upload_file(&k, &args.filename, &args.content).await }
        }),
    )
    .await;

    let (u, k) = (Arc::clone(&uploads), Arc::clone(&session_key));
    rpc.register(
        "uploadMultipartStart",
        handler_async(move |args: MultipartStartArgs| {
            let (u, k) = (Arc::clone(&u), Arc::clone(&k));
            async move { u.multipart_start(&k, &args.filename).await }
        }),
    )
    .await;

    let u = Arc::clone(&uploads);
    rpc.register(
        "uploadMultipartChunk",
        handler_async(move |args: MultipartChunkArgs| {
            let u = Arc::clone(&u);
            async move { u.multipart_chunk(&args.upload_id, &args.chunk).await }
        }),
    )
    .await;

    let u = Arc::clone(&uploads);
    rpc.register(
        "uploadMultipartComplete",
        handler_async(move |args: MultipartIdArgs| {
            let u = Arc::clone(&u);
            async move { u.multipart_complete(&args.upload_id).await }
        }),
    )
    .await;

    let u = Arc::clone(&uploads);
    rpc.register(
        "uploadMultipartAbort",
        handler_async(move |args: MultipartIdArgs| {
            let u = Arc::clone(&u);
            async move { u.multipart_abort(&args.upload_id).await }
        }),
    )
    .await;

    let (u, k) = (Arc::clone(&uploads), Arc::clone(&session_key));
    rpc.register(
        "deleteUpload",
        handler_async(move |args: DeleteUploadArgs| {
            let (u, k) = (Arc::clone(&u), Arc::clone(&k));
            async move { u.delete_upload(&k, &args.path).await }
        }),
    )
    .await;
}
