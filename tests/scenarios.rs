//! End-to-end scenarios exercising fibers, cords and channels together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use strand::fiber::{Channel, Scheduler, SendError};
use strand::{context, cord};

#[test]
fn fiber_ping_pong_one_thread() {
    let sched = Scheduler::new();
    let c1 = Arc::new(Channel::new(0));
    let c2 = Arc::new(Channel::new(0));
    let sched2 = sched.clone();
    let (c1a, c2a) = (c1.clone(), c2.clone());
    sched
        .start(move || {
            let (c1b, c2b) = (c1a.clone(), c2a.clone());
            sched2.spawn(move || {
                let m: i32 = c2b.recv().expect("channel is open");
                c1b.send(m * m).expect("channel is open");
                Ok(())
            })?;
            c2a.send(2).expect("channel is open");
            assert_eq!(c1a.recv(), Some(4));
            Ok(())
        })
        .unwrap();
}

#[test]
fn fiber_ping_pong_two_threads() {
    let c1 = Arc::new(Channel::new(0));
    let c2 = Arc::new(Channel::new(0));
    let (c1b, c2b) = (c1.clone(), c2.clone());
    let responder = cord::spawn(move || {
        context::scheduler()
            .expect("installed by cord::spawn")
            .start(move || {
                let m: i32 = c2b.recv().expect("channel is open");
                c1b.send(m * m).expect("channel is open");
                Ok(())
            })
    })
    .unwrap();
    let requester = cord::spawn(move || {
        context::scheduler()
            .expect("installed by cord::spawn")
            .start(move || {
                c2.send(2).expect("channel is open");
                assert_eq!(c1.recv(), Some(4));
                Ok(())
            })
    })
    .unwrap();
    requester.join().unwrap();
    responder.join().unwrap();
}

#[test]
fn rendezvous_self_deadlock() {
    let c = Arc::new(Channel::<i32>::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let (c2, done2) = (c.clone(), done.clone());
    let lone = cord::spawn(move || {
        context::scheduler()
            .expect("installed by cord::spawn")
            .start(move || {
                // With no peer, the send is only ever released by close,
                // and the value comes back.
                assert_eq!(c2.send(2), Err(SendError(2)));
                assert_eq!(c2.recv(), None);
                done2.store(true, Ordering::Relaxed);
                Ok(())
            })
    })
    .unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::Relaxed), "the lone fiber cannot progress");
    c.close();
    lone.join().unwrap();
    assert!(done.load(Ordering::Relaxed));
}

#[test]
fn rendezvous_unraveled_by_second_fiber() {
    let sched = Scheduler::new();
    let c = Arc::new(Channel::new(0));
    let (sched2, c2) = (sched.clone(), c.clone());
    // The first fiber parks on send with no peer...
    sched
        .spawn(move || {
            c2.send(2).expect("a receiver unravels the knot");
            assert_eq!(c2.recv(), Some(2));
            Ok(())
        })
        .unwrap();
    // ...until a second fiber receives and sends back.
    let c3 = c.clone();
    sched
        .start(move || {
            sched2.spawn(move || {
                let r: i32 = c3.recv().expect("a sender is parked");
                assert_eq!(r, 2);
                c3.send(r).expect("channel is open");
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn capacity_one_completes_without_a_peer() {
    let sched = Scheduler::new();
    sched
        .start(|| {
            let c = Channel::new(1);
            c.send(2).expect("buffer has room");
            assert_eq!(c.recv(), Some(2));
            Ok(())
        })
        .unwrap();
}

#[test]
fn close_wakes_a_parked_fiber() {
    let c = Arc::new(Channel::<i32>::new(0));
    let c2 = c.clone();
    let waiter = cord::spawn(move || {
        context::scheduler()
            .expect("installed by cord::spawn")
            .start(move || {
                assert_eq!(c2.recv(), None);
                Ok(())
            })
    })
    .unwrap();
    thread::sleep(Duration::from_millis(50));
    c.close();
    waiter.join().unwrap();
}

#[test]
fn bare_thread_feeds_a_fiber() {
    let c = Arc::new(Channel::new(0));
    let c2 = c.clone();
    let producer = thread::spawn(move || {
        for i in 0..10 {
            c2.send(i).expect("channel is open");
        }
    });
    let c3 = c.clone();
    let consumer = cord::spawn(move || {
        context::scheduler()
            .expect("installed by cord::spawn")
            .start(move || {
                for i in 0..10 {
                    assert_eq!(c3.recv(), Some(i));
                }
                Ok(())
            })
    })
    .unwrap();
    producer.join().unwrap();
    consumer.join().unwrap();
}
