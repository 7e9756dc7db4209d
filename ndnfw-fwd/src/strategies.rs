//! Strategies built into the forwarder.
//!
//! [`BuiltinRuntime`] stands in for the bytecode runtime: the image of a
//! builtin program is its name in ASCII.

use ndnfw_core::{FaceId, NackReason};
use ndnfw_tables::{StrategyAction, StrategyContext, StrategyEvent, StrategyProgram, StrategyRuntime, TableError};

/// Sends every Interest to all usable nexthops.
pub struct Multicast;

impl StrategyProgram for Multicast {
    fn invoke(&self, ctx: &mut StrategyContext<'_>) -> StrategyAction {
        if ctx.event != StrategyEvent::RxInterest {
            return StrategyAction::Drop;
        }
        let faces: Vec<FaceId> = ctx
            .nexthops
            .iter()
            .copied()
            .filter(|&face| face != ctx.in_face && ctx.is_up(face))
            .collect();
        if faces.is_empty() {
            StrategyAction::Nack(NackReason::NoRoute)
        } else {
            StrategyAction::Forward(faces)
        }
    }
}

/// Sends to the first usable nexthop and falls back to the next untried
/// one when every tried upstream returned a Nack.
pub struct BestRoute;

impl BestRoute {
    fn usable(ctx: &StrategyContext<'_>, face: FaceId) -> bool {
        face != ctx.in_face && ctx.is_up(face) && !ctx.pit.downstreams().iter().any(|dn| dn.face == face)
    }
}

impl StrategyProgram for BestRoute {
    fn invoke(&self, ctx: &mut StrategyContext<'_>) -> StrategyAction {
        let choice = match ctx.event {
            StrategyEvent::RxInterest => ctx.nexthops.iter().copied().find(|&face| Self::usable(ctx, face)),
            StrategyEvent::RxNack | StrategyEvent::Timer => ctx
                .nexthops
                .iter()
                .copied()
                .find(|&face| Self::usable(ctx, face) && ctx.pit.find_up(face).is_none()),
        };
        match (choice, ctx.event) {
            (Some(face), _) => StrategyAction::Forward(vec![face]),
            (None, StrategyEvent::RxInterest) => StrategyAction::Nack(NackReason::NoRoute),
            (None, _) => StrategyAction::Drop,
        }
    }
}

/// Rejects every Interest.
pub struct Reject;

impl StrategyProgram for Reject {
    fn invoke(&self, _ctx: &mut StrategyContext<'_>) -> StrategyAction {
        StrategyAction::Nack(NackReason::NoRoute)
    }
}

/// Runtime that knows the builtin programs.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinRuntime;

impl BuiltinRuntime {
    /// Names of the builtin programs; each is also its own image.
    pub const PROGRAMS: &'static [&'static str] = &["multicast", "best-route", "reject"];
}

impl StrategyRuntime for BuiltinRuntime {
    fn load(&self, name: &str, image: &[u8]) -> Result<Box<dyn StrategyProgram>, TableError> {
        let program = std::str::from_utf8(image)
            .map_err(|_| TableError::StrategyLoad(format!("image of {name} is not a builtin program name")))?
            .trim();
        match program {
            "multicast" => Ok(Box::new(Multicast)),
            "best-route" => Ok(Box::new(BestRoute)),
            "reject" => Ok(Box::new(Reject)),
            other => Err(TableError::StrategyLoad(format!("unknown builtin program {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndnfw_core::{Interest, Name};
    use ndnfw_tables::{FaceStatus, Pcct, PcctConfig, PitInsertResult};
    use std::time::Instant;

    struct Down(Vec<FaceId>);

    impl FaceStatus for Down {
        fn is_up(&self, face: FaceId) -> bool {
            !self.0.contains(&face)
        }
    }

    fn run(program: &dyn StrategyProgram, event: StrategyEvent, nexthops: &[FaceId], down: &[FaceId], forwarded: &[FaceId]) -> StrategyAction {
        let now = Instant::now();
        let mut pcct = Pcct::new(PcctConfig::default()).unwrap();
        let interest = Interest::new(Name::parse("/s").unwrap()).with_nonce(1);
        let PitInsertResult::New(pit) = pcct.pit_insert(&interest, 1, None, now) else {
            panic!("expected a new PIT entry");
        };
        for &face in forwarded {
            pcct.pit_forward(pit, face, now).unwrap();
        }
        let faces = Down(down.to_vec());
        let entry = pcct.pit_entry(pit).unwrap();
        let mut ctx = StrategyContext::new(event, entry.interest(), 1, entry, nexthops, &faces);
        program.invoke(&mut ctx)
    }

    #[test]
    fn test_multicast() {
        let action = run(&Multicast, StrategyEvent::RxInterest, &[1, 2, 3, 4], &[3], &[]);
        assert_eq!(action, StrategyAction::Forward(vec![2, 4]));
        let action = run(&Multicast, StrategyEvent::RxInterest, &[1, 3], &[3], &[]);
        assert_eq!(action, StrategyAction::Nack(NackReason::NoRoute));
        assert_eq!(run(&Multicast, StrategyEvent::RxNack, &[2], &[], &[2]), StrategyAction::Drop);
    }

    #[test]
    fn test_best_route() {
        assert_eq!(
            run(&BestRoute, StrategyEvent::RxInterest, &[1, 2, 3], &[2], &[]),
            StrategyAction::Forward(vec![3])
        );
        assert_eq!(
            run(&BestRoute, StrategyEvent::RxNack, &[2, 3, 4], &[], &[2]),
            StrategyAction::Forward(vec![3])
        );
        assert_eq!(run(&BestRoute, StrategyEvent::RxNack, &[2, 3], &[], &[2, 3]), StrategyAction::Drop);
        assert_eq!(
            run(&BestRoute, StrategyEvent::RxInterest, &[1], &[], &[]),
            StrategyAction::Nack(NackReason::NoRoute)
        );
    }

    #[test]
    fn test_runtime_load() {
        let runtime = BuiltinRuntime;
        for name in BuiltinRuntime::PROGRAMS {
            assert!(runtime.load(name, name.as_bytes()).is_ok());
        }
        assert!(matches!(runtime.load("x", b"flood"), Err(TableError::StrategyLoad(_))));
        assert!(matches!(runtime.load("x", &[0xFF]), Err(TableError::StrategyLoad(_))));
    }
}
