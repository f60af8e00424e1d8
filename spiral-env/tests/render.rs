use spiral_core::{
    Result, SpiralError,
    env::{Action, Env, RenderMode},
};
use spiral_env::{ToyEnv, viewer::Viewer};

#[test]
fn human_rendering_dumps_numbered_frames() -> Result<()> {
    let dir = tempfile::tempdir().map_err(|err| SpiralError::io("tempdir", err))?;
    let frames = dir.path().join("frames");
    let mut env = ToyEnv::new(4)?.with_viewer(Viewer::with_frame_dir(&frames));
    env.reset()?;
    for step in 0..3 {
        let x = step as f32 / 3.;
        env.step(&Action::new([x, 0.5], 1., [1., 0., 0.], 1)?)?;
        assert!(env.render(RenderMode::Human)?.is_none());
    }
    assert_eq!(env.viewer().frames(), 3);
    assert!(frames.join("frame_00000.png").is_file());
    assert!(frames.join("frame_00002.png").is_file());
    env.close()?;
    Ok(())
}

#[test]
fn rgb_rendering_returns_the_canvas() -> Result<()> {
    let mut env = ToyEnv::new(3)?;
    let observation = env.reset()?;
    let canvas = env.render(RenderMode::RgbArray)?.expect("rgb render returns the canvas");
    assert_eq!(canvas, observation.image);
    Ok(())
}
