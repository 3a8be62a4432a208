mod common;
use common::*;

use std::time::{Duration, Instant};

#[test]
fn expect_from_report_number() {
    assert_eq!(Expect::from(0), Expect::Ack);
    assert_eq!(Expect::from(2), Expect::Report(2));
    assert_eq!(Expect::Report(100).command("report"), "report 100");
    assert_eq!(Expect::Ack.command("ena 1"), "ena 1");
}

#[test]
fn expect_matching() {
    let ok = Message::Ack(OK.to_string());
    let err = Message::Ack("TCH-ERR :unknown".to_string());
    let report = Factory::datagram(r#"{"ID": "2"}"#).message;

    assert!(Expect::Ack.matches(&ok));
    assert!(!Expect::Ack.matches(&err));
    assert!(!Expect::Ack.matches(&report));
    assert!(Expect::Line.matches(&err));
    assert!(Expect::Report(2).matches(&report));
    assert!(!Expect::Report(3).matches(&report));
    assert!(!Expect::Report(2).matches(&ok));
}

#[tokio::test]
async fn happy_path() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox,
    } = Factory::harness();

    let sf = async {
        let report: Report2 = charger.roundtrip().report(2).await?;
        assert_eq!(report.plug, 7);
        assert_eq!(report.state, 3);
        Ok::<(), anyhow::Error>(())
    };

    let tf = reply(&mut commands, &inbox, "report 2", r#"{"ID": "2", "Plug": 7, "State": 3}"#);

    futures::try_join!(tf, sf).unwrap();
}

#[tokio::test]
async fn no_reply() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox: _inbox,
    } = Factory::harness();

    let sf = async {
        let result = charger.roundtrip().report::<Report2>(2).await;
        let err = result.unwrap_err();
        assert!(matches!(expect_error(&err), Error::Timeout));
        assert_eq!(err.to_string(), "recv timeout");
        Ok::<(), anyhow::Error>(())
    };

    let tf = async {
        assert_eq!(commands.recv().await.as_deref(), Some("report 2"));
        Ok::<(), anyhow::Error>(())
    };

    futures::try_join!(tf, sf).unwrap();
}

#[tokio::test]
async fn other_report_is_ignored() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox,
    } = Factory::harness();

    let sf = async {
        let err = charger.roundtrip().report::<Report2>(2).await.unwrap_err();
        assert!(matches!(expect_error(&err), Error::Timeout));
        Ok::<(), anyhow::Error>(())
    };

    // report 3 while waiting for report 2
    let tf = reply(&mut commands, &inbox, "report 2", r#"{"ID": "3", "P": 1000}"#);

    futures::try_join!(tf, sf).unwrap();
}

#[tokio::test]
async fn other_report_then_match() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox,
    } = Factory::harness();

    let sf = async {
        let report: Report2 = charger.roundtrip().report(2).await?;
        assert_eq!(report.plug, 5);
        Ok::<(), anyhow::Error>(())
    };

    let tf = async {
        reply(&mut commands, &inbox, "report 2", r#"{"ID": "3", "P": 1000}"#).await?;
        inbox.send(Factory::datagram(r#"{"State": 2}"#)).await?;
        inbox.send(Factory::ok()).await?;
        inbox.send(Factory::datagram(r#"{"ID": "2", "Plug": 5}"#)).await?;
        Ok::<(), anyhow::Error>(())
    };

    futures::try_join!(tf, sf).unwrap();
}

#[tokio::test]
async fn ack_skips_other_lines() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox,
    } = Factory::harness();

    let sf = async {
        charger.roundtrip().ack("ena 1").await?;
        Ok::<(), anyhow::Error>(())
    };

    let tf = async {
        reply(&mut commands, &inbox, "ena 1", "TCH-ERR :unknown command").await?;
        inbox.send(Factory::datagram(r#"{"ID": "2"}"#)).await?;
        inbox.send(Factory::ok()).await?;
        Ok::<(), anyhow::Error>(())
    };

    futures::try_join!(tf, sf).unwrap();
}

#[tokio::test]
async fn ack_not_satisfied_by_other_line() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox,
    } = Factory::harness();

    let sf = async {
        let err = charger.roundtrip().ack("ena 1").await.unwrap_err();
        assert!(matches!(expect_error(&err), Error::Timeout));
        Ok::<(), anyhow::Error>(())
    };

    let tf = reply(&mut commands, &inbox, "ena 1", "TCH-ERR :unknown command");

    futures::try_join!(tf, sf).unwrap();
}

#[tokio::test]
async fn stale_reply_is_discarded() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox,
    } = Factory::harness();

    // left over from an earlier call that timed out
    inbox.send(Factory::datagram(r#"{"ID": "2", "Plug": 1}"#)).await.unwrap();

    let sf = async {
        let err = charger.roundtrip().report::<Report2>(2).await.unwrap_err();
        assert!(matches!(expect_error(&err), Error::Timeout));
        Ok::<(), anyhow::Error>(())
    };

    let tf = async {
        assert_eq!(commands.recv().await.as_deref(), Some("report 2"));
        Ok::<(), anyhow::Error>(())
    };

    futures::try_join!(tf, sf).unwrap();
}

#[tokio::test]
async fn send_failure_is_immediate() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox: _inbox,
    } = Factory::harness_with(None, true);

    let start = Instant::now();
    let err = charger.roundtrip().report::<Report2>(2).await.unwrap_err();

    assert!(err.downcast_ref::<Error>().is_none());
    assert!(err.to_string().contains("network unreachable"));
    assert!(start.elapsed() < Factory::timeout());
    assert!(commands.try_recv().is_err());
}

#[tokio::test]
async fn nothing_left_behind_after_timeout() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox,
    } = Factory::harness();

    let err = charger.roundtrip().ack("ena 0").await.unwrap_err();
    assert!(matches!(expect_error(&err), Error::Timeout));
    assert_eq!(commands.recv().await.as_deref(), Some("ena 0"));

    // the inbox is still open and free for the next call
    assert!(!inbox.is_closed());

    let sf = async {
        charger.roundtrip().ack("ena 1").await?;
        Ok::<(), anyhow::Error>(())
    };
    let tf = reply(&mut commands, &inbox, "ena 1", OK);

    futures::try_join!(tf, sf).unwrap();
}

#[tokio::test]
async fn calls_to_one_charger_queue_up() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox,
    } = Factory::harness();

    let first = async {
        let report: Report2 = charger.roundtrip().report(2).await?;
        assert_eq!(report.plug, 7);
        Ok::<(), anyhow::Error>(())
    };

    let second = async {
        let report: Report3 = charger.roundtrip().report(3).await?;
        assert_eq!(report.p, 4200);
        Ok::<(), anyhow::Error>(())
    };

    // the second command is only sent once the first one is answered
    let tf = async {
        for _ in 0..2 {
            match commands.recv().await.as_deref() {
                Some("report 2") => inbox.send(Factory::datagram(r#"{"ID": "2", "Plug": 7}"#)).await?,
                Some("report 3") => inbox.send(Factory::datagram(r#"{"ID": "3", "P": 4200}"#)).await?,
                other => panic!("unexpected command {:?}", other),
            }
            assert!(commands.try_recv().is_err());
        }
        Ok::<(), anyhow::Error>(())
    };

    futures::try_join!(tf, first, second).unwrap();
}

#[tokio::test]
async fn close_cancels_call_in_flight() {
    common_setup();

    let Harness {
        charger,
        mut commands,
        inbox: _inbox,
    } = Factory::harness();

    let sf = async {
        let err = charger.roundtrip().report::<Report2>(2).await.unwrap_err();
        assert!(matches!(expect_error(&err), Error::Cancelled));
        Ok::<(), anyhow::Error>(())
    };

    let tf = async {
        assert_eq!(commands.recv().await.as_deref(), Some("report 2"));
        charger.close();
        Ok::<(), anyhow::Error>(())
    };

    futures::try_join!(tf, sf).unwrap();

    assert!(charger.roundtrip().is_closed());
    let err = charger.roundtrip().ack("ena 1").await.unwrap_err();
    assert!(matches!(expect_error(&err), Error::Cancelled));
    assert!(commands.try_recv().is_err());
}

#[tokio::test]
async fn closed_inbox_is_an_error() {
    common_setup();

    let Harness {
        charger,
        commands: _commands,
        inbox,
    } = Factory::harness();
    drop(inbox);

    let result = tokio::time::timeout(Duration::from_secs(5), charger.roundtrip().ack("ena 1")).await;
    let err = result.unwrap().unwrap_err();
    assert!(err.to_string().contains("inbox closed"));
}
