use spiral_agents::optim::rules::{Sgd, UpdateRuleKind};
use spiral_api::{
    builders::spiral::SpiralBuilder,
    draw_episode, evaluate,
    test_utils::{toy_agent, toy_builder},
};
use spiral_core::{Result, dataset::Dataset};
use spiral_env::ToyEnv;

#[test]
fn conditional_builder_trains_one_step() -> Result<()> {
    let builder = toy_builder(true);
    let (mut agent, dataset) = toy_agent(&builder)?;
    assert_eq!(agent.generator().arch().condition_dim, dataset.condition_dim());
    assert_eq!(agent.discriminator().arch().condition_dim, dataset.condition_dim());

    let mut env = ToyEnv::new(3)?;
    let stats = agent.train_step(&mut env)?;
    assert_eq!(stats.transitions, 3);
    assert_eq!(dataset.draws(), 1);
    assert_eq!(agent.gen_optimizer().applied(), 1);
    assert_eq!(agent.dis_optimizer().applied(), 1);
    Ok(())
}

#[test]
fn unconditional_builder_ignores_condition() -> Result<()> {
    let builder = toy_builder(false);
    let (agent, _) = toy_agent(&builder)?;
    assert_eq!(agent.generator().arch().condition_dim, 0);
    assert_eq!(agent.discriminator().arch().condition_dim, 0);
    Ok(())
}

#[test]
fn unconditioned_discriminator_is_accepted() -> Result<()> {
    let builder = SpiralBuilder {
        conditional_discriminator: false,
        ..toy_builder(true)
    };
    let (agent, dataset) = toy_agent(&builder)?;
    assert_eq!(agent.generator().arch().condition_dim, dataset.condition_dim());
    assert_eq!(agent.discriminator().arch().condition_dim, 0);
    Ok(())
}

#[test]
fn builder_reads_from_toml() -> Result<()> {
    let builder: SpiralBuilder = toml::from_str(
        r#"
        imsize = 3
        generator_layers = [8]

        [gen_optimizer.rule]
        kind = "sgd"
        lr = 0.5

        [config]
        timestep_limit = 4
        "#,
    )
    .map_err(|e| spiral_core::SpiralError::InvalidConfig(e.to_string()))?;
    assert_eq!(builder.imsize, 3);
    assert_eq!(builder.generator_layers, vec![8]);
    assert_eq!(builder.discriminator_layers, vec![128, 64]);
    assert_eq!(builder.gen_optimizer.rule, UpdateRuleKind::Sgd(Sgd { lr: 0.5 }));
    assert_eq!(builder.config.timestep_limit, 4);
    Ok(())
}

#[test]
fn episode_returns_final_canvas() -> Result<()> {
    let (agent, dataset) = toy_agent(&toy_builder(true))?;
    let mut env = ToyEnv::new(3)?;
    let condition = dataset.sample()?;
    let canvas = draw_episode(&agent, &mut env, Some(&condition))?;
    let canvas = canvas.ok_or_else(|| spiral_core::SpiralError::InvalidConfig("no canvas".into()))?;
    assert_eq!((canvas.width(), canvas.height()), (3, 3));
    Ok(())
}

#[test]
fn evaluation_scores_every_sample() -> Result<()> {
    let (agent, dataset) = toy_agent(&toy_builder(true))?;
    let mut env = ToyEnv::new(3)?;
    let samples = vec![dataset.sample()?, dataset.sample()?];
    let scores = evaluate(&agent, &mut env, &samples)?;
    assert_eq!(scores.len(), 2);
    assert!(scores.iter().all(|s| s.is_finite() && *s <= 0.));
    Ok(())
}
