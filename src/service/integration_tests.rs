//! Service-layer integration tests (encode → mask → reward → buffer → PPO, loopback training)

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use crate::game::{compute_reward, ActionCatalog, Command, GameMessage, Vocabulary};
    use crate::service::policy::{ActorCritic, LinearPolicy};
    use crate::service::ppo::{update, PpoConfig};
    use crate::service::records::{MemoryRecorder, MetricsSink};
    use crate::service::{
        action_mask, observation_size, ActionHistory, Bridge, ObservationEncoder, RolloutBuffer,
        Trainer, TrainerSettings, Transition, Worker, WorkerSettings,
    };

    fn combat(monster_hp: i64, player_hp: i64, turn: i64) -> Value {
        json!({
            "in_game": true,
            "available_commands": ["play", "end", "potion", "state"],
            "game_state": {
                "screen_type": "NONE",
                "class": "IRONCLAD",
                "floor": 2,
                "gold": 99,
                "current_hp": player_hp,
                "max_hp": 80,
                "deck": [
                    {"name": "Strike", "id": "Strike_R", "type": "ATTACK", "rarity": "BASIC", "cost": 1},
                    {"name": "Bash", "id": "Bash", "type": "ATTACK", "rarity": "BASIC", "cost": 2}
                ],
                "potions": [
                    {"id": "Fire Potion", "name": "Fire Potion", "requires_target": true, "can_use": true, "can_discard": true}
                ],
                "relics": [{"id": "Burning Blood", "name": "Burning Blood", "counter": -1}],
                "combat_state": {
                    "turn": turn,
                    "player": {"current_hp": player_hp, "max_hp": 80, "block": 0, "energy": 3, "powers": []},
                    "hand": [
                        {"name": "Strike", "id": "Strike_R", "type": "ATTACK", "cost": 1, "is_playable": true, "has_target": true},
                        {"name": "Defend", "id": "Defend_R", "type": "SKILL", "cost": 1, "is_playable": true, "has_target": false}
                    ],
                    "monsters": [
                        {"id": "JawWorm", "name": "Jaw Worm", "current_hp": monster_hp, "max_hp": 44,
                         "intent": "ATTACK", "is_gone": false, "powers": []}
                    ]
                }
            }
        })
    }

    /// 不含藥水指令的戰鬥狀態，獎勵只來自 HP 變化
    fn combat_without_potions(monster_hp: i64, player_hp: i64) -> Value {
        let mut v = combat(monster_hp, player_hp, 1);
        v["available_commands"] = json!(["play", "end", "state"]);
        v
    }

    fn card_reward() -> Value {
        json!({
            "in_game": true,
            "available_commands": ["choose", "proceed", "state"],
            "game_state": {
                "screen_type": "COMBAT_REWARD",
                "floor": 2,
                "current_hp": 70,
                "max_hp": 80,
                "choice_list": ["gold", "card"],
                "screen_state": {"rewards": [{"type": "GOLD"}, {"type": "CARD"}]}
            }
        })
    }

    // ========================================================================
    // encode / mask
    // ========================================================================

    #[test]
    fn test_encode_and_mask_are_order_independent() {
        let catalog = ActionCatalog::build();
        let encoder = ObservationEncoder::new(Vocabulary::shared());
        let history = ActionHistory::new();
        let msg = GameMessage::new(combat(40, 70, 1));

        let mask_first = action_mask(&msg, &catalog, &history);
        let obs_after = encoder.encode(&msg);
        let obs_first = encoder.encode(&msg);
        let mask_after = action_mask(&msg, &catalog, &history);

        assert_eq!(mask_first, mask_after);
        assert_eq!(obs_first, obs_after);
        assert_eq!(obs_first.flatten().len(), observation_size());
    }

    #[test]
    fn test_combat_mask_and_commands() {
        let catalog = ActionCatalog::build();
        let msg = GameMessage::new(combat(40, 70, 1));
        let mut history = ActionHistory::new();
        history.observe(&msg);
        let mask = action_mask(&msg, &catalog, &history);

        let legal: Vec<String> = catalog
            .iter()
            .filter(|a| mask[a.index])
            .map(|a| a.to_command())
            .collect();
        assert!(legal.contains(&"PLAY 1 0".to_string()));
        assert!(legal.contains(&"PLAY 2".to_string()));
        assert!(legal.contains(&"POTION Use 0 0".to_string()));
        assert!(legal.contains(&"POTION Discard 0 0".to_string()));
        // 需要目標的藥水不能以無目標形式使用或丟棄
        assert!(!legal.contains(&"POTION Discard 0".to_string()));
        // 本回合尚未行動，不能直接 END
        assert!(!legal.contains(&"END".to_string()));

        history.record(catalog.index_of("PLAY 2").unwrap());
        history.observe(&msg);
        let mask = action_mask(&msg, &catalog, &history);
        assert!(mask[catalog.index_of("END").unwrap()]);
    }

    #[test]
    fn test_sampled_actions_are_always_legal() {
        let catalog = ActionCatalog::build();
        let encoder = ObservationEncoder::new(Vocabulary::shared());
        let policy = LinearPolicy::new(observation_size(), catalog.len(), 1e-3);
        let mut rng = StdRng::seed_from_u64(11);

        for state in [combat(40, 70, 1), card_reward()] {
            let msg = GameMessage::new(state);
            let mask = action_mask(&msg, &catalog, &ActionHistory::new());
            let obs = encoder.encode(&msg);
            for _ in 0..20 {
                let step = policy.act(&obs, &mask, &mut rng).unwrap();
                assert!(mask[step.action], "illegal {}", catalog[step.action]);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_mask_and_encoding_shapes_hold(hp in 0i64..60, player in 1i64..80, turn in 0i64..5) {
            let catalog = ActionCatalog::build();
            let encoder = ObservationEncoder::new(Vocabulary::shared());
            let msg = GameMessage::new(combat(hp, player, turn));
            let mask = action_mask(&msg, &catalog, &ActionHistory::new());
            prop_assert_eq!(mask.len(), catalog.len());
            prop_assert_eq!(encoder.encode(&msg).flatten().len(), observation_size());
        }
    }

    // ========================================================================
    // reward → buffer → GAE → PPO
    // ========================================================================

    fn collect(n_steps: usize) -> RolloutBuffer {
        let catalog = ActionCatalog::build();
        let encoder = ObservationEncoder::new(Vocabulary::shared());
        let policy = LinearPolicy::new(observation_size(), catalog.len(), 1e-3);
        let mut rng = StdRng::seed_from_u64(3);
        let mut history = ActionHistory::new();
        let mut buffer = RolloutBuffer::new(n_steps, catalog.len(), 0.97, 0.95);

        let mut msg = GameMessage::new(combat_without_potions(44, 80));
        for i in 0..n_steps {
            history.observe(&msg);
            let obs = encoder.encode(&msg);
            let mask = action_mask(&msg, &catalog, &history);
            let step = policy.act(&obs, &mask, &mut rng).unwrap();
            history.record(step.action);

            let next = GameMessage::new(combat_without_potions(44 - 5 * (i as i64 + 1), 80 - i as i64));
            let reward = compute_reward(&msg, &next, Some(&catalog[step.action]));
            buffer
                .add(Transition {
                    observation: obs,
                    action: step.action,
                    reward,
                    done: i == 0,
                    value: step.value,
                    log_prob: step.log_prob,
                    mask,
                })
                .unwrap();
            msg = next;
        }
        let last = policy.predict_value(&encoder.encode(&msg)).unwrap();
        buffer.compute_returns_and_advantage(last, false).unwrap();
        buffer
    }

    #[test]
    fn test_buffer_end_to_end_batches() {
        let buffer = collect(4);
        let batches: Vec<_> = buffer.get(2).unwrap().collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].start, 0);
        assert_eq!(batches[1].start, 2);
        let covered: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(covered, 4);
        for (i, r) in buffer.returns().iter().enumerate() {
            // value 全為 0（新 policy），return 等於 advantage
            assert!((r - buffer.advantages()[i]).abs() < 1e-6);
        }
        // 每步怪物 -5 HP、玩家 -1 HP → 5 - 3 = 2
        assert!(buffer.rewards().iter().skip(1).all(|&r| (r - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_ppo_update_over_collected_buffer() {
        let catalog = ActionCatalog::build();
        let mut policy = LinearPolicy::new(observation_size(), catalog.len(), 1e-3);
        let buffer = collect(8);
        let config = PpoConfig {
            n_epochs: 4,
            batch_size: 4,
            ..PpoConfig::default()
        };
        let before = policy
            .evaluate_actions(&buffer.get(8).unwrap().next().unwrap())
            .unwrap()
            .values;
        let stats = update(&mut policy, &buffer, &config, 1.0).unwrap();
        assert_eq!(stats.minibatches, 8);
        assert_eq!(stats.skipped, 0);
        let after = policy
            .evaluate_actions(&buffer.get(8).unwrap().next().unwrap())
            .unwrap()
            .values;
        // return 為正，critic 應往上移
        assert!(after.iter().sum::<f32>() > before.iter().sum::<f32>());
    }

    // ========================================================================
    // loopback：遊戲 ↔ worker ↔ trainer
    // ========================================================================

    /// 每收到一條指令就回一份戰鬥狀態，怪物 HP 逐步下降；連線關閉即結束
    async fn serve_game(listener: TcpListener) -> Vec<String> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        let mut hp = 44;
        socket.write_all(combat(hp, 80, 1).to_string().as_bytes()).await.unwrap();
        let mut buf = [0u8; 256];
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            seen.push(String::from_utf8_lossy(&buf[..n]).to_string());
            hp = (hp - 3).max(1);
            if socket.write_all(combat(hp, 80, 1).to_string().as_bytes()).await.is_err() {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_loopback_training_round() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let game = tokio::spawn(serve_game(listener));

        let catalog = Arc::new(ActionCatalog::build());
        let policy = LinearPolicy::new(observation_size(), catalog.len(), 1e-3);
        let bridge = Bridge::connect(("127.0.0.1", port), Duration::from_secs(2)).await.unwrap();
        let checkpoint = dir.path().join("policy.json");

        let (tx, rx) = mpsc::channel(4);
        let worker = Worker::new(
            WorkerSettings {
                id: 0,
                n_steps: 4,
                gamma: 0.97,
                gae_lambda: 0.95,
                reload_interval: 1,
                checkpoint_path: checkpoint.clone(),
                end_of_episode_commands: vec!["PROCEED".into(), "PROCEED".into()],
                idle_command: "STATE".into(),
                seed: 5,
                metrics: MetricsSink::new(dir.path().join("metrics.json"), 10),
            },
            bridge,
            policy.clone(),
            Arc::clone(&catalog),
            ObservationEncoder::new(Vocabulary::shared()),
            Arc::new(MemoryRecorder::new()),
            tx,
        );
        let handle = worker.spawn();

        let trainer = Trainer::new(
            TrainerSettings {
                workers: 1,
                n_steps: 4,
                total_steps: 8,
                checkpoint_path: checkpoint.clone(),
                ppo: PpoConfig {
                    n_epochs: 2,
                    batch_size: 2,
                    ..PpoConfig::default()
                },
            },
            policy,
        );
        let summary = trainer.run(rx).await.unwrap();
        handle.abort();
        let _ = handle.await;
        let commands = game.await.unwrap();

        assert!(summary.completed);
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.steps, 8);
        assert!(checkpoint.exists());
        assert!(commands.len() >= 8);
        let catalog = ActionCatalog::build();
        for command in &commands {
            let index = catalog.index_of(command).unwrap();
            assert!(matches!(
                catalog[index].command,
                Command::Play | Command::End | Command::Potion
            ));
        }
    }
}
