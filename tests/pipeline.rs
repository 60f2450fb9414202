use std::sync::Arc;
use std::{env, fs};

use ndarray::arr2;

use gradnet::data::mnist::{build_image_bytes, build_label_bytes};
use gradnet::data::{BatchSource, MnistSource};
use gradnet::layer::{ConnectState, Layer, Node, PoolKind, PoolingLayer};
use gradnet::updater::{
    shared_param, AsyncPsUpdater, AsyncUpdater, LocalStore, ParamStore, Updater,
};

const ROWS: usize = 4;
const COLS: usize = 4;

fn write_dataset(n: usize, stem: &str) -> (String, String) {
    let images: Vec<Vec<u8>> = (0..n).map(|i| vec![(i * 10) as u8; ROWS * COLS]).collect();
    let refs: Vec<&[u8]> = images.iter().map(|v| v.as_slice()).collect();
    let img = build_image_bytes(&refs, ROWS as u32, COLS as u32);
    let lbl = build_label_bytes(&(0..n).map(|i| (i % 10) as u8).collect::<Vec<_>>());

    let dir = env::temp_dir();
    let img_path = dir.join(format!("gradnet-{stem}-{}-images", std::process::id()));
    let lbl_path = dir.join(format!("gradnet-{stem}-{}-labels", std::process::id()));
    fs::write(&img_path, img).unwrap();
    fs::write(&lbl_path, lbl).unwrap();
    (
        img_path.to_string_lossy().into_owned(),
        lbl_path.to_string_lossy().into_owned(),
    )
}

fn make_source(n: usize, batch_size: usize, stem: &str) -> MnistSource {
    let (img, lbl) = write_dataset(n, stem);
    let mut src = MnistSource::new();
    src.set_param("batch_size", &batch_size.to_string());
    src.set_param("path_img", &img);
    src.set_param("path_label", &lbl);
    src.set_param("silent", "1");
    src.init().unwrap();
    src
}

#[test]
fn epoch_of_25_instances_yields_two_batches_and_restarts() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut src = make_source(25, 10, "epoch");

    let first: Vec<f32> = src.next().unwrap().data.iter().copied().collect();
    let second = src.next().unwrap();
    assert_eq!(second.batch_size, 10);
    assert_eq!(second.inst_index.unwrap(), (10..20).collect::<Vec<u32>>());
    assert!(src.next().is_none());

    src.before_first();
    let again: Vec<f32> = src.next().unwrap().data.iter().copied().collect();
    assert_eq!(first, again);
}

#[test]
fn forward_backward_step_with_async_update() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut src = make_source(8, 4, "train");

    // pooling layer over the batch source's output shape
    let mut layer = PoolingLayer::new(PoolKind::Max);
    layer.set_param("kernel_size", "2");
    layer.set_param("stride", "2");

    // a stand-in learnable weight serviced by the parameter store
    let store: Arc<dyn ParamStore> = Arc::new(LocalStore::new(0.5));
    let param = shared_param(1, 2);
    param.lock().weight.assign(&arr2(&[[1.0, -1.0]]));
    let mut updater = AsyncPsUpdater::for_layer(0, "wmat", store, param.clone()).unwrap();
    updater.init();

    let mut nodes_in = vec![Node::new(4, 1, ROWS, COLS)];
    let mut nodes_out = vec![Node::new(1, 1, 1, 1)];
    let mut state = ConnectState::default();
    layer
        .init_connection(&nodes_in, &mut nodes_out, &mut state)
        .unwrap();
    assert_eq!(nodes_out[0].shape(), (4, 1, 2, 2));

    let mut epoch = 0u64;
    for _round in 0..2 {
        src.before_first();
        while let Some(batch) = src.next() {
            updater.before_all_forward().unwrap();

            nodes_in[0].data.assign(&batch.data);
            layer
                .forward(true, &mut nodes_in, &mut nodes_out, &mut state)
                .unwrap();

            // pretend loss gradient w.r.t. the pooled output
            nodes_out[0].data.fill(1.0);
            param.lock().grad.assign(&arr2(&[[1.0, 0.0]]));

            updater.before_backprop(&nodes_in, &nodes_out);
            layer
                .backprop(true, &mut nodes_in, &mut nodes_out, &mut state)
                .unwrap();
            updater.after_backprop(true, epoch).unwrap();

            // the push overlaps whatever the compute thread does next;
            // join it before the weight is read again
            updater.update_wait().unwrap();
            epoch += 1;
        }
    }
    assert_eq!(epoch, 4);

    // four pushes at eta=0.5 against grad [1, 0]
    updater.before_all_forward().unwrap();
    let blk = param.lock();
    assert_eq!(blk.weight, arr2(&[[-1.0, -1.0]]));
}

#[test]
fn synchronous_entry_points_stay_disabled_end_to_end() {
    let store: Arc<dyn ParamStore> = Arc::new(LocalStore::new(0.1));
    let param = shared_param(1, 1);
    let mut updater = AsyncPsUpdater::for_layer(2, "bias", store, param).unwrap();

    assert!(updater.update(0).is_err());
    assert!(updater.update_wait().is_ok());
    assert!(updater.update_wait().is_ok());
}
