mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use promio::event::{wait, Loop};
use promio::io::{HandleType, Tcp};

const CONTENT: &[u8] = b"an awesome message to keep";

#[test]
fn test_connect_listen_read_close() {
    support::init_log();
    let lp = Loop::new().unwrap();

    let server = Tcp::new(&lp);
    server.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let received_client = Arc::new(AtomicBool::new(false));
    let read_completed = Arc::new(AtomicBool::new(false));
    let listen_completed = Arc::new(AtomicBool::new(false));
    let connected = Arc::new(AtomicBool::new(false));

    {
        let received_client = received_client.clone();
        let read_completed = read_completed.clone();
        let listen_completed = listen_completed.clone();
        server
            .listen(128, move |client| {
                received_client.store(true, Ordering::SeqCst);
                assert_eq!(HandleType::Tcp, client.handle_type());

                let read_completed = read_completed.clone();
                client
                    .read(move |buffer| {
                        assert_eq!(Bytes::from_static(CONTENT), buffer);
                    })
                    .then(move |bytes_read| {
                        assert_eq!(CONTENT.len(), bytes_read);
                        read_completed.store(true, Ordering::SeqCst);
                    });
            })
            .then(move |()| {
                listen_completed.store(true, Ordering::SeqCst);
            });
    }

    let addr = server.local_addr().unwrap();
    let client = Tcp::new(&lp);
    {
        let connected = connected.clone();
        let sender = client.clone();
        client.connect(addr).then(move |()| {
            connected.store(true, Ordering::SeqCst);
            sender
                .write(Bytes::from_static(CONTENT))
                .then(move |bytes_written| {
                    assert_eq!(CONTENT.len(), bytes_written);
                    sender.close()
                })
        });
    }

    // Give the transfer time to finish, then stop the server.
    {
        let server = server.clone();
        wait(&lp, support::millis(100)).then(move |()| server.close());
    }

    lp.run().unwrap();
    assert!(connected.load(Ordering::SeqCst));
    assert!(received_client.load(Ordering::SeqCst));
    assert!(read_completed.load(Ordering::SeqCst));
    assert!(listen_completed.load(Ordering::SeqCst));
}
