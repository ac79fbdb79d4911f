//! JNI 原生函数实现
//!
//! 句柄即原生堆地址。可计数对象的创建函数会为调用者持有一次计数，
//! 用 `ReleaseRef` 归还；其他对象用 `Free` 释放。

use glam::{DVec3, Quat, Vec3};
use jni::objects::JClass;
use jni::sys::{jboolean, jdouble, jdoubleArray, jfloat, jfloatArray, jint, jlong, jstring};
use jni::JNIEnv;
use std::ptr;

use crate::config::get_config;
use crate::native::body::{self, Activation, BodySettingsData, MotionType};
use crate::native::{filter, heap, job, query, shape, system};
use crate::runtime;

use super::{address, finite, free_uncounted, report, to_jboolean};

// ============================================================================
// 运行时
// ============================================================================

/// 获取版本号
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_GetVersion(env: JNIEnv, _class: JClass) -> jstring {
    match env.new_string(runtime::VERSION) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_IsDoublePrecision(_env: JNIEnv, _class: JClass) -> jboolean {
    to_jboolean(runtime::is_double_precision())
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_InitRuntime(_env: JNIEnv, _class: JClass) -> jboolean {
    to_jboolean(runtime::init_runtime())
}

/// 关闭运行时，返回清扫的泄漏数量
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_ShutdownRuntime(_env: JNIEnv, _class: JClass) -> jint {
    runtime::shutdown_runtime() as jint
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_LiveObjects(_env: JNIEnv, _class: JClass) -> jlong {
    runtime::live_objects() as jlong
}

/// 释放不计数的对象（设置、过滤表、物理系统、作业系统等）
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_Free(_env: JNIEnv, _class: JClass, handle: jlong) -> jboolean {
    let Some(va) = address(handle) else {
        return 0;
    };
    to_jboolean(free_uncounted(va))
}

// ============================================================================
// 引用计数与引用单元
// ============================================================================

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_AddRef(_env: JNIEnv, _class: JClass, target: jlong) -> jint {
    address(target)
        .and_then(|va| report("AddRef", heap::add_ref(va)))
        .map(|n| n as jint)
        .unwrap_or(0)
}

/// 计数归零时目标被释放
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_ReleaseRef(_env: JNIEnv, _class: JClass, target: jlong) -> jint {
    address(target)
        .and_then(|va| report("ReleaseRef", heap::release_ref(va)))
        .map(|n| n as jint)
        .unwrap_or(0)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_RefCount(_env: JNIEnv, _class: JClass, target: jlong) -> jint {
    address(target)
        .and_then(|va| report("RefCount", heap::ref_count(va)))
        .map(|n| n as jint)
        .unwrap_or(0)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_SetEmbedded(
    _env: JNIEnv,
    _class: JClass,
    target: jlong,
) -> jboolean {
    let Some(va) = address(target) else {
        return 0;
    };
    to_jboolean(report("SetEmbedded", heap::set_embedded(va)).is_some())
}

/// 创建引用单元；`target` 为 0 时得到空引用
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_RefNew(_env: JNIEnv, _class: JClass, target: jlong) -> jlong {
    report("RefNew", heap::ref_new(target as u64))
        .map(|va| va as jlong)
        .unwrap_or(0)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_RefCopy(_env: JNIEnv, _class: JClass, cell: jlong) -> jlong {
    address(cell)
        .and_then(|va| report("RefCopy", heap::ref_copy(va)))
        .map(|va| va as jlong)
        .unwrap_or(0)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_RefTarget(_env: JNIEnv, _class: JClass, cell: jlong) -> jlong {
    address(cell)
        .and_then(|va| report("RefTarget", heap::ref_target(va)))
        .map(|va| va as jlong)
        .unwrap_or(0)
}

/// 释放引用单元，目标计数随之减一
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_RefFree(_env: JNIEnv, _class: JClass, cell: jlong) -> jboolean {
    let Some(va) = address(cell) else {
        return 0;
    };
    to_jboolean(report("RefFree", heap::free(va)).is_some())
}

// ============================================================================
// 形状
// ============================================================================

/// 新建的形状设置为调用者持有一次计数
fn owned_shape_settings(kind: shape::SettingsKind) -> jlong {
    let va = shape::create_settings(kind);
    match report("创建形状设置", heap::add_ref(va)) {
        Some(_) => va as jlong,
        None => 0,
    }
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateBoxShapeSettings(
    _env: JNIEnv,
    _class: JClass,
    half_x: jfloat,
    half_y: jfloat,
    half_z: jfloat,
    convex_radius: jfloat,
) -> jlong {
    if !finite(&[half_x as f64, half_y as f64, half_z as f64, convex_radius as f64]) {
        return 0;
    }
    owned_shape_settings(shape::SettingsKind::Box {
        half_extent: Vec3::new(half_x, half_y, half_z),
        convex_radius,
    })
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateSphereShapeSettings(
    _env: JNIEnv,
    _class: JClass,
    radius: jfloat,
) -> jlong {
    if !finite(&[radius as f64]) {
        return 0;
    }
    owned_shape_settings(shape::SettingsKind::Sphere { radius })
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateCapsuleShapeSettings(
    _env: JNIEnv,
    _class: JClass,
    half_height: jfloat,
    radius: jfloat,
) -> jlong {
    if !finite(&[half_height as f64, radius as f64]) {
        return 0;
    }
    owned_shape_settings(shape::SettingsKind::Capsule { half_height, radius })
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_SetShapeSettingsDensity(
    _env: JNIEnv,
    _class: JClass,
    settings: jlong,
    density: jfloat,
) -> jboolean {
    let Some(va) = address(settings) else {
        return 0;
    };
    if !finite(&[density as f64]) {
        return 0;
    }
    to_jboolean(report("设置密度", shape::edit_settings(va, |s| s.density = density)).is_some())
}

/// 由设置构建形状；失败返回 0，成功时为调用者持有一次计数
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateShape(
    _env: JNIEnv,
    _class: JClass,
    settings: jlong,
) -> jlong {
    let Some(va) = address(settings) else {
        return 0;
    };
    let Some(result) = report("构建形状", shape::create_result(va)) else {
        return 0;
    };
    let shape_va = match shape::result_shape(result) {
        Ok(0) => {
            if let Ok(error) = shape::result_error(result) {
                log::warn!("[JNI] 形状构建失败: {}", error);
            }
            0
        }
        Ok(shape_va) => report("构建形状", heap::add_ref(shape_va).map(|_| shape_va)).unwrap_or(0),
        Err(fault) => {
            log::error!("[JNI] 读取形状结果失败: {}", fault);
            0
        }
    };
    report("释放形状结果", heap::free(result));
    shape_va as jlong
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_GetShapeVolume(
    _env: JNIEnv,
    _class: JClass,
    shape_handle: jlong,
) -> jfloat {
    address(shape_handle)
        .and_then(|va| report("形状体积", shape::volume(va)))
        .unwrap_or(0.0)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_GetShapeMass(
    _env: JNIEnv,
    _class: JClass,
    shape_handle: jlong,
) -> jfloat {
    address(shape_handle)
        .and_then(|va| report("形状质量", shape::mass(va)))
        .unwrap_or(0.0)
}

// ============================================================================
// 刚体创建设置
// ============================================================================

/// 运动类型序号：0 静态，1 运动学，2 动态
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateBodyCreationSettings(
    _env: JNIEnv,
    _class: JClass,
    shape_handle: jlong,
    x: jdouble,
    y: jdouble,
    z: jdouble,
    qx: jfloat,
    qy: jfloat,
    qz: jfloat,
    qw: jfloat,
    motion_type: jint,
    object_layer: jint,
) -> jlong {
    let Some(shape_va) = address(shape_handle) else {
        return 0;
    };
    if !finite(&[x, y, z, qx as f64, qy as f64, qz as f64, qw as f64]) {
        return 0;
    }
    let Some(motion_type) = MotionType::from_ordinal(motion_type) else {
        log::warn!("[JNI] 未知的运动类型 {}", motion_type);
        return 0;
    };
    if object_layer < 0 {
        return 0;
    }
    let data = BodySettingsData {
        position: DVec3::new(x, y, z),
        rotation: Quat::from_xyzw(qx, qy, qz, qw),
        motion_type,
        object_layer: object_layer as u32,
        shape: shape_va,
        ..BodySettingsData::default()
    };
    report("创建刚体设置", body::create_settings(data))
        .map(|va| va as jlong)
        .unwrap_or(0)
}

// ============================================================================
// 过滤表
// ============================================================================

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateBroadPhaseLayerInterface(
    _env: JNIEnv,
    _class: JClass,
    num_object_layers: jint,
    num_broad_phase_layers: jint,
) -> jlong {
    if num_object_layers <= 0 || num_broad_phase_layers <= 0 {
        return 0;
    }
    filter::create_bp_interface(num_object_layers as u32, num_broad_phase_layers as u32) as jlong
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_MapObjectToBroadPhaseLayer(
    _env: JNIEnv,
    _class: JClass,
    bp_interface: jlong,
    object_layer: jint,
    broad_phase_layer: jint,
) -> jboolean {
    let Some(va) = address(bp_interface) else {
        return 0;
    };
    if object_layer < 0 || !(0..=u8::MAX as jint).contains(&broad_phase_layer) {
        return 0;
    }
    let mapped = filter::map_object_to_broad_phase_layer(va, object_layer as u32, broad_phase_layer as u8);
    to_jboolean(report("映射宽相层", mapped).unwrap_or(false))
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateObjectLayerPairFilter(
    _env: JNIEnv,
    _class: JClass,
    num_object_layers: jint,
) -> jlong {
    if num_object_layers <= 0 {
        return 0;
    }
    filter::create_ovo_filter(num_object_layers as u32) as jlong
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_EnableLayerCollision(
    _env: JNIEnv,
    _class: JClass,
    pair_filter: jlong,
    layer1: jint,
    layer2: jint,
    enabled: jboolean,
) -> jboolean {
    let Some(va) = address(pair_filter) else {
        return 0;
    };
    if layer1 < 0 || layer2 < 0 {
        return 0;
    }
    let set = filter::set_layer_collision(va, layer1 as u32, layer2 as u32, enabled != 0);
    to_jboolean(report("设置层碰撞", set).unwrap_or(false))
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateObjectVsBroadPhaseLayerFilter(
    _env: JNIEnv,
    _class: JClass,
    bp_interface: jlong,
    num_broad_phase_layers: jint,
    pair_filter: jlong,
    num_object_layers: jint,
) -> jlong {
    let (Some(bp_va), Some(ovo_va)) = (address(bp_interface), address(pair_filter)) else {
        return 0;
    };
    if num_broad_phase_layers <= 0 || num_object_layers <= 0 {
        return 0;
    }
    let created = filter::create_ovb_filter(bp_va, num_broad_phase_layers as u32, ovo_va, num_object_layers as u32);
    report("创建宽相过滤", created).map(|va| va as jlong).unwrap_or(0)
}

// ============================================================================
// 物理系统、临时分配器与作业系统
// ============================================================================

/// 三张层表须在物理系统释放之前保持存活
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreatePhysicsSystem(
    _env: JNIEnv,
    _class: JClass,
    max_bodies: jint,
    num_body_mutexes: jint,
    max_body_pairs: jint,
    max_contact_constraints: jint,
    bp_interface: jlong,
    ovb_filter: jlong,
    pair_filter: jlong,
) -> jlong {
    let (Some(bp_va), Some(ovb_va), Some(ovo_va)) = (address(bp_interface), address(ovb_filter), address(pair_filter))
    else {
        return 0;
    };
    if max_bodies < 0 || num_body_mutexes < 0 || max_body_pairs < 0 || max_contact_constraints < 0 {
        return 0;
    }
    let created = system::create(
        max_bodies as u32,
        num_body_mutexes as u32,
        max_body_pairs as u32,
        max_contact_constraints as u32,
        bp_va,
        ovb_va,
        ovo_va,
    );
    let Some(system_va) = report("创建物理系统", created) else {
        return 0;
    };
    let gravity = Vec3::from_array(get_config().default_gravity);
    report("设置重力", system::set_gravity(system_va, gravity));
    system_va as jlong
}

/// 容量不大于 0 时使用配置中的默认值
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateTempAllocator(
    _env: JNIEnv,
    _class: JClass,
    bytes: jint,
) -> jlong {
    let capacity = if bytes > 0 { bytes as usize } else { get_config().temp_allocator_bytes };
    job::create_temp_allocator(capacity) as jlong
}

/// 线程数不大于 0 时使用配置中的默认值
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateJobSystem(
    _env: JNIEnv,
    _class: JClass,
    max_jobs: jint,
    max_barriers: jint,
    num_threads: jint,
) -> jlong {
    if max_jobs <= 0 || max_barriers <= 0 {
        return 0;
    }
    let threads = if num_threads > 0 { num_threads as usize } else { get_config().job_threads };
    job::create_job_system(max_jobs as u32, max_barriers as u32, threads) as jlong
}

/// 推进模拟，返回容量警告位掩码；句柄无效或参数非法时返回 -1
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_Update(
    _env: JNIEnv,
    _class: JClass,
    physics_system: jlong,
    delta_time: jfloat,
    collision_steps: jint,
    temp_allocator: jlong,
    job_system: jlong,
) -> jint {
    let (Some(system_va), Some(temp_va), Some(job_va)) =
        (address(physics_system), address(temp_allocator), address(job_system))
    else {
        return -1;
    };
    if !finite(&[delta_time as f64]) || collision_steps <= 0 {
        return -1;
    }
    report(
        "Update",
        system::update(system_va, delta_time, collision_steps as u32, temp_va, job_va),
    )
    .map(|mask| mask as jint)
    .unwrap_or(-1)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_GetNumBodies(
    _env: JNIEnv,
    _class: JClass,
    physics_system: jlong,
) -> jint {
    address(physics_system)
        .and_then(|va| report("刚体数量", system::num_bodies(va)))
        .map(|n| n as jint)
        .unwrap_or(0)
}

// ============================================================================
// 刚体
// ============================================================================

/// 返回刚体代理地址；容量已满或形状无效时返回 0
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateBody(
    _env: JNIEnv,
    _class: JClass,
    physics_system: jlong,
    settings: jlong,
) -> jlong {
    let (Some(system_va), Some(settings_va)) = (address(physics_system), address(settings)) else {
        return 0;
    };
    report("创建刚体", system::create_body(system_va, settings_va))
        .map(|va| va as jlong)
        .unwrap_or(0)
}

/// `activation` 为 0 时激活刚体
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_AddBody(
    _env: JNIEnv,
    _class: JClass,
    body_handle: jlong,
    activation: jint,
) -> jboolean {
    let activation = if activation == 0 { Activation::Activate } else { Activation::DontActivate };
    let added = address(body_handle)
        .and_then(|va| report("定位刚体", body::body_location(va)))
        .and_then(|(system_va, id)| report("加入刚体", system::add_body(system_va, id, activation)))
        .unwrap_or(false);
    to_jboolean(added)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_RemoveBody(
    _env: JNIEnv,
    _class: JClass,
    body_handle: jlong,
) -> jboolean {
    let removed = address(body_handle)
        .and_then(|va| report("定位刚体", body::body_location(va)))
        .and_then(|(system_va, id)| report("移除刚体", system::remove_body(system_va, id)))
        .unwrap_or(false);
    to_jboolean(removed)
}

/// 只能销毁已移出模拟的刚体
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_DestroyBody(
    _env: JNIEnv,
    _class: JClass,
    body_handle: jlong,
) -> jboolean {
    let destroyed = address(body_handle)
        .and_then(|va| report("销毁刚体", system::destroy_body_by_proxy(va)))
        .unwrap_or(false);
    to_jboolean(destroyed)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_IsBodyActive(
    _env: JNIEnv,
    _class: JClass,
    body_handle: jlong,
) -> jboolean {
    let active = address(body_handle)
        .and_then(|va| report("定位刚体", body::body_location(va)))
        .and_then(|(system_va, id)| report("查询激活", system::is_active(system_va, id)))
        .unwrap_or(false);
    to_jboolean(active)
}

/// 返回新的 double[3]；刚体不存在时返回 null
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_GetBodyPosition(
    env: JNIEnv,
    _class: JClass,
    body_handle: jlong,
) -> jdoubleArray {
    let position = address(body_handle)
        .and_then(|va| report("定位刚体", body::body_location(va)))
        .and_then(|(system_va, id)| report("读取位置", system::position(system_va, id)))
        .flatten();
    let Some(position) = position else {
        return ptr::null_mut();
    };
    let Ok(array) = env.new_double_array(3) else {
        return ptr::null_mut();
    };
    if env.set_double_array_region(&array, 0, &position.to_array()).is_err() {
        return ptr::null_mut();
    }
    array.into_raw()
}

/// 返回新的 float[3]；刚体不存在时返回 null
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_GetBodyLinearVelocity(
    env: JNIEnv,
    _class: JClass,
    body_handle: jlong,
) -> jfloatArray {
    let velocity = address(body_handle)
        .and_then(|va| report("定位刚体", body::body_location(va)))
        .and_then(|(system_va, id)| report("读取速度", system::linear_velocity(system_va, id)))
        .flatten();
    let Some(velocity) = velocity else {
        return ptr::null_mut();
    };
    let Ok(array) = env.new_float_array(3) else {
        return ptr::null_mut();
    };
    if env.set_float_array_region(&array, 0, &velocity.to_array()).is_err() {
        return ptr::null_mut();
    }
    array.into_raw()
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_SetBodyLinearVelocity(
    _env: JNIEnv,
    _class: JClass,
    body_handle: jlong,
    x: jfloat,
    y: jfloat,
    z: jfloat,
) -> jboolean {
    if !finite(&[x as f64, y as f64, z as f64]) {
        return 0;
    }
    let set = address(body_handle)
        .and_then(|va| report("定位刚体", body::body_location(va)))
        .and_then(|(system_va, id)| {
            report("设置速度", system::set_linear_velocity(system_va, id, Vec3::new(x, y, z)))
        })
        .unwrap_or(false);
    to_jboolean(set)
}

// ============================================================================
// 射线查询
// ============================================================================

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CreateClosestHitCastRayCollector(
    _env: JNIEnv,
    _class: JClass,
) -> jlong {
    query::create_closest_hit_collector() as jlong
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CastRay(
    _env: JNIEnv,
    _class: JClass,
    system_handle: jlong,
    ox: jdouble,
    oy: jdouble,
    oz: jdouble,
    dx: jfloat,
    dy: jfloat,
    dz: jfloat,
    collector_handle: jlong,
) -> jboolean {
    if !finite(&[ox, oy, oz, dx as f64, dy as f64, dz as f64]) {
        return 0;
    }
    let (Some(system_va), Some(collector_va)) = (address(system_handle), address(collector_handle)) else {
        return 0;
    };
    let origin = DVec3::new(ox, oy, oz);
    let direction = Vec3::new(dx, dy, dz);
    let hit = report("投射射线", query::cast_ray(system_va, origin, direction, collector_va)).unwrap_or(false);
    to_jboolean(hit)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CollectorHadHit(
    _env: JNIEnv,
    _class: JClass,
    collector_handle: jlong,
) -> jboolean {
    let had_hit = address(collector_handle)
        .and_then(|va| report("读取命中", query::had_hit(va)))
        .unwrap_or(false);
    to_jboolean(had_hit)
}

/// 命中结果地址；只在收集器存活期间有效，不能单独释放
#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_CollectorGetHit(
    _env: JNIEnv,
    _class: JClass,
    collector_handle: jlong,
) -> jlong {
    address(collector_handle)
        .and_then(|va| report("读取命中", query::hit(va)))
        .map_or(0, |va| va as jlong)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_RayCastResultFraction(
    _env: JNIEnv,
    _class: JClass,
    result_handle: jlong,
) -> jfloat {
    address(result_handle)
        .and_then(|va| report("读取命中比例", query::result(va)))
        .map_or(query::NO_HIT_FRACTION, |(_, fraction)| fraction)
}

#[no_mangle]
pub extern "system" fn Java_net_physbridge_NativeFunc_RayCastResultBodyId(
    _env: JNIEnv,
    _class: JClass,
    result_handle: jlong,
) -> jint {
    address(result_handle)
        .and_then(|va| report("读取命中刚体", query::result(va)))
        .map_or(-1, |(id, _)| id.raw() as jint)
}
