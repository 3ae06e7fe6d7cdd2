use comms::{
    msg::{Command, Msg, Payload},
    specs::{
        machine_learning::{InitSpec, OptimizerSpec, ParamSpec},
        server::SessionSpec,
    },
};
use tokio::io;

#[tokio::test]
async fn send_recv_params() {
    const SIZE: usize = 1024;

    let params = [1.0, -2.5, 3.25, 0.0, 7.5];
    let msg = Msg::Data(Payload::Params {
        version: 42,
        params: &params,
    });

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Params { version, params: p }) => {
            assert_eq!(version, 42);
            assert_eq!(p, params);
        }
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test]
async fn send_recv_sequence() {
    const SIZE: usize = 4096;

    let spec = SessionSpec {
        start_step: 3,
        num_steps: 10,
        optimizer: OptimizerSpec::GradientDescentWithMomentum {
            learning_rate: 0.1,
            momentum: 0.9,
        },
        params: vec![ParamSpec {
            name: "weights".into(),
            len: 2,
            init: InitSpec::Const { value: 0.0 },
        }],
    };

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);
    let (rx_half, tx_half) = io::split(two);
    let (mut rx, _) = comms::channel(rx_half, tx_half);

    tx.send(&Msg::Control(Command::Join { worker_id: 1 }))
        .await
        .unwrap();
    tx.send(&Msg::Control(Command::Init(spec.clone())))
        .await
        .unwrap();

    let present = [1, 0];
    let grad = [0.5, 0.25, 0.0];
    tx.send(&Msg::Data(Payload::Grad {
        loss: 0.75,
        present: &present,
        grad: &grad,
    }))
    .await
    .unwrap();
    tx.send(&Msg::Err("boom".into())).await.unwrap();

    let mut buf = Vec::new();

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Control(Command::Join { worker_id }) => assert_eq!(worker_id, 1),
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Control(Command::Init(received)) => assert_eq!(received, spec),
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Grad {
            loss,
            present: p,
            grad: g,
        }) => {
            assert_eq!(loss, 0.75);
            assert_eq!(p, present);
            assert_eq!(g, grad);
        }
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Err(e) => assert_eq!(e, "boom"),
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    use tokio::io::AsyncWriteExt;

    let (mut one, two) = io::duplex(64);
    one.write_all(&u64::MAX.to_be_bytes()).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf = Vec::new();
    let err = rx.recv_into::<Msg>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
