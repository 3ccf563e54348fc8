//! Local HTTP server for exercising the remote clients in tests.

use std::net::TcpListener;
use std::thread;

use axum::Router;

/// Serves `router` on an ephemeral port from a background thread and
/// returns its base url. The socket is bound before this returns, so
/// requests queue until the server thread starts accepting.
pub(crate) fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
    let addr = listener.local_addr().expect("stub address");
    listener
        .set_nonblocking(true)
        .expect("non-blocking stub listener");

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("stub runtime");
        runtime.block_on(async move {
            let listener =
                tokio::net::TcpListener::from_std(listener).expect("stub tokio listener");
            let _ = axum::serve(listener, router).await;
        });
    });
    format!("http://{addr}")
}
