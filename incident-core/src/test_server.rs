use axum::Router;
use std::sync::mpsc;

/// Serves `router` on an ephemeral local port from its own runtime thread and
/// returns the base URL. Blocking clients under test stay off that runtime.
pub(crate) fn serve(router: Router) -> String {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            tx.send(listener.local_addr().expect("local addr"))
                .expect("send addr");
            axum::serve(listener, router).await.expect("serve");
        });
    });
    format!("http://{}", rx.recv().expect("server addr"))
}
