mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use promio::event::Loop;
use promio::io::Udp;

const DATAGRAM: &[u8] = b"an awesome message to keep";

#[test]
fn test_send_and_receive_datagram() {
    support::init_log();
    let lp = Loop::new().unwrap();

    let receiver = Udp::new(&lp);
    receiver.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = receiver.local_addr().unwrap();

    let sender = Udp::new(&lp);
    sender.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let received = Arc::new(AtomicBool::new(false));
    let read_completed = Arc::new(AtomicBool::new(false));
    let sent = Arc::new(AtomicBool::new(false));

    {
        let received = received.clone();
        let read_completed = read_completed.clone();
        let stopper = receiver.clone();
        receiver
            .read(move |datagram| {
                assert_eq!(Bytes::from_static(DATAGRAM), datagram);
                received.store(true, Ordering::SeqCst);
                stopper.stop_read();
            })
            .then(move |bytes_read| {
                assert_eq!(DATAGRAM.len(), bytes_read);
                read_completed.store(true, Ordering::SeqCst);
            });
    }

    {
        let sent = sent.clone();
        let writer = sender.clone();
        sender.connect(addr).then(move |()| {
            writer.write(Bytes::from_static(DATAGRAM)).then(move |n| {
                assert_eq!(DATAGRAM.len(), n);
                sent.store(true, Ordering::SeqCst);
            })
        });
    }

    lp.run().unwrap();
    assert!(sent.load(Ordering::SeqCst));
    assert!(received.load(Ordering::SeqCst));
    assert!(read_completed.load(Ordering::SeqCst));
}
