//! Host/worker exchange over in-memory pipes, and the in-process backend
//! end to end.

use chunk_minify::{
    Error, MinifyOptions, MinifyPlugin, MinifyTask, NameCache, OutputFormat, OutputOptions,
    PluginOptions, RenderedChunk, SourcemapOption, WorkerBackend, WorkerConnection,
};
use dodeca_cell_runtime::cell_minify_proto::{Chunk, FrameReader};
use tokio::io::{AsyncWriteExt, DuplexStream, duplex};

const SOURCE: &str = r#"
function computeTotal(items) {
    var total = 0;
    for (var index = 0; index < items.length; index++) {
        total += items[index].price;
    }
    return total;
}
console.log(computeTotal(window.cart));
"#;

/// A worker that prints `banner` on stdout before serving with the real minifier.
fn spawn_worker(banner: &'static [u8]) -> WorkerConnection<DuplexStream, DuplexStream> {
    let (host_tx, worker_rx) = duplex(256 * 1024);
    let (mut worker_tx, host_rx) = duplex(256 * 1024);

    tokio::spawn(async move {
        worker_tx.write_all(banner).await.unwrap();
        dodeca_cell_runtime::serve(worker_rx, worker_tx, dodeca_minify::minify)
            .await
            .unwrap();
    });

    WorkerConnection::new(0, host_rx, host_tx)
}

fn task(code: &str) -> MinifyTask {
    MinifyTask {
        code: code.to_string(),
        options: MinifyOptions::default(),
    }
}

#[test_log::test(tokio::test)]
async fn worker_minifies_over_pipes() {
    let mut connection = spawn_worker(b"");

    let output = connection.request(task(SOURCE)).await.unwrap();
    assert!(output.code.len() < SOURCE.len());
    assert!(output.code.contains("console.log"));
    assert!(output.source_map.is_none());

    // The same connection keeps serving.
    let output = connection
        .request(MinifyTask {
            code: SOURCE.to_string(),
            options: MinifyOptions {
                source_map: Some(true),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    assert!(output.source_map.unwrap().contains("\"version\":3"));
}

#[test_log::test(tokio::test)]
async fn stray_stdout_does_not_break_the_protocol() {
    let mut connection = spawn_worker(b"worker says hi\nand again\n");

    let output = connection.request(task("var answer = 40 + 2; alert(answer);")).await;
    assert!(output.is_ok(), "{output:?}");
}

#[test_log::test(tokio::test)]
async fn minifier_errors_come_back_as_task_failures() {
    let mut connection = spawn_worker(b"");

    let err = connection.request(task("function (")).await.unwrap_err();
    assert!(matches!(err, Error::Minify(_)), "{err}");

    // A failed task does not poison the worker.
    assert!(connection.request(task("alert(1 + 1);")).await.is_ok());
}

#[test_log::test(tokio::test)]
async fn worker_exit_mid_task_is_a_crash() {
    let (host_tx, worker_rx) = duplex(64 * 1024);
    let (worker_tx, host_rx) = duplex(64 * 1024);

    tokio::spawn(async move {
        // Read the request, then go away without answering.
        let mut frames = FrameReader::new(worker_rx);
        assert!(matches!(frames.next().await, Ok(Some(Chunk::Frame(_)))));
        drop(worker_tx);
    });

    let mut connection = WorkerConnection::new(3, host_rx, host_tx);
    let err = connection.request(task("alert(1);")).await.unwrap_err();
    match err {
        Error::WorkerCrashed { index, .. } => assert_eq!(index, 3),
        other => panic!("unexpected error: {other}"),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn thread_backend_renders_chunks() {
    let options = PluginOptions {
        worker: Some(WorkerBackend::Thread),
        max_workers: Some(2),
        minify: MinifyOptions {
            name_cache: Some(NameCache::default()),
            ..Default::default()
        },
        ..Default::default()
    };
    let plugin = MinifyPlugin::new(options).unwrap();

    let output = OutputOptions::new(OutputFormat::Cjs).with_sourcemap(SourcemapOption::Enabled);
    let chunks = [RenderedChunk::new("cart.js"), RenderedChunk::new("checkout.js")];
    let results = futures::future::join_all(
        chunks
            .iter()
            .map(|chunk| plugin.render_chunk(SOURCE, chunk, &output)),
    )
    .await;

    for result in results {
        let rendered = result.unwrap();
        assert!(rendered.code().len() < SOURCE.len());
        assert!(rendered.map().unwrap().contains("\"version\":3"));
    }

    assert!(!plugin.session().is_active());
    assert_eq!(plugin.session().pools_created(), 1);
    assert!(plugin.name_cache().is_some());
}

#[test_log::test(tokio::test)]
async fn thread_backend_handles_es_modules() {
    let options = PluginOptions {
        worker: Some(WorkerBackend::Thread),
        ..Default::default()
    };
    let plugin = MinifyPlugin::new(options).unwrap();

    let rendered = plugin
        .render_chunk(
            "export function double(value) { return value * 2; }\n",
            &RenderedChunk::new("math.js"),
            &OutputOptions::new(OutputFormat::Es),
        )
        .await
        .unwrap();

    assert!(rendered.code().contains("export"));
    assert_eq!(rendered.map(), None);
}
