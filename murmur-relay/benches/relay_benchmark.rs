use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use murmur_relay::broadcast::BroadcastGroup;
use murmur_relay::protocol::{ClientMessage, Color, ServerMessage};
use murmur_relay::registry::SessionId;
use murmur_relay::router::BroadcastRouter;
use murmur_relay::typing::TypingAggregator;
use murmur_relay::SessionRegistry;
use std::sync::Arc;

fn bench_server_encode(c: &mut Criterion) {
    let writing = ServerMessage::Writing((1..=8).map(|n| format!("User{n}")).collect());
    let username = ServerMessage::Username {
        name: "User42".into(),
        color: Color::new(0x3FA7C2),
    };

    c.bench_function("encode_writing_8_names", |b| {
        b.iter(|| black_box(black_box(&writing).encode()))
    });
    c.bench_function("encode_username", |b| {
        b.iter(|| black_box(black_box(&username).encode()))
    });
}

fn bench_decode(c: &mut Criterion) {
    c.bench_function("decode_server_writing", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box("writing:User1:User2:User3")).unwrap()))
    });
    c.bench_function("decode_server_chat", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box("User7: hello there")).unwrap()))
    });
    c.bench_function("decode_client_typing", |b| {
        b.iter(|| black_box(ClientMessage::decode(black_box("writing:yes")).unwrap()))
    });
}

fn bench_fan_out(c: &mut Criterion) {
    let group = BroadcastGroup::new(1024);
    let mut receivers: Vec<_> = (0..100).map(|_| group.subscribe()).collect();
    let msg = ServerMessage::Chat("User1: benchmark line".into());

    c.bench_function("broadcast_100_receivers", |b| {
        b.iter(|| {
            group.broadcast(black_box(&msg));
            for rx in receivers.iter_mut() {
                black_box(rx.try_recv().ok());
            }
        })
    });
}

fn bench_router_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let router = BroadcastRouter::new(1024, None);
    let ids: Vec<SessionId> = (0..16).map(|_| SessionId::new()).collect();
    let mut receivers: Vec<_> = rt.block_on(async {
        let mut out = Vec::new();
        for id in &ids {
            out.push(router.connect(*id).await.receiver);
        }
        out
    });

    c.bench_function("router_dispatch_chat_16_sessions", |b| {
        b.iter(|| {
            rt.block_on(router.dispatch(ids[0], black_box("hello everyone"))).unwrap();
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

fn bench_typing_toggle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = Arc::new(SessionRegistry::new());
    let typing = TypingAggregator::new(registry.clone());
    let sessions: Vec<_> = rt.block_on(async {
        let mut out = Vec::new();
        for _ in 0..32 {
            out.push(registry.register(SessionId::new()).await.id);
        }
        out
    });

    c.bench_function("typing_toggle_32_sessions", |b| {
        b.iter(|| {
            rt.block_on(async {
                for id in &sessions {
                    black_box(typing.set_typing(*id, true).await);
                }
                for id in &sessions {
                    black_box(typing.set_typing(*id, false).await);
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_server_encode,
    bench_decode,
    bench_fan_out,
    bench_router_dispatch,
    bench_typing_toggle,
);
criterion_main!(benches);
