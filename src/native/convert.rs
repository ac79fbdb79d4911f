//! glam ↔ Rapier 数学类型转换
//!
//! Rapier 的数学类型与宿主侧 glam 版本不一定相同，统一按分量转换。

use glam::{DMat4, DVec3, Mat4, Quat, Vec3};
use rapier3d::prelude::*;

/// 将 glam Vec3 转换为 Rapier Vector
pub fn to_vector(v: Vec3) -> Vector {
    Vector::new(v.x, v.y, v.z)
}

/// 将 Rapier Vector 转换为 glam Vec3
pub fn from_vector(v: &Vector) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn to_rotation(q: Quat) -> Rotation {
    Rotation::from_xyzw(q.x, q.y, q.z, q.w)
}

pub fn from_rotation(r: &Rotation) -> Quat {
    Quat::from_xyzw(r.x, r.y, r.z, r.w)
}

/// 位置（双精度，在边界处收窄为单精度）+ 旋转 → Rapier Pose
pub fn to_pose(position: DVec3, rotation: Quat) -> Pose {
    Pose::from_translation(to_vector(position.as_vec3()))
        * Pose::from_rotation(to_rotation(rotation.normalize()))
}

/// Rapier Pose → (位置, 旋转)
pub fn from_pose(pose: &Pose) -> (DVec3, Quat) {
    let t = &pose.translation;
    (
        DVec3::new(t.x as f64, t.y as f64, t.z as f64),
        from_rotation(&pose.rotation),
    )
}

/// 将 glam Mat4 转换为 Rapier Pose（忽略缩放）
pub fn mat4_to_pose(mat: Mat4) -> Pose {
    let (_, rotation, translation) = mat.to_scale_rotation_translation();
    Pose::from_translation(to_vector(translation)) * Pose::from_rotation(to_rotation(rotation))
}

/// 将 Rapier Pose 转换为 glam Mat4
pub fn pose_to_mat4(pose: &Pose) -> Mat4 {
    let (position, rotation) = from_pose(pose);
    Mat4::from_rotation_translation(rotation, position.as_vec3())
}

/// 将 Rapier Pose 转换为双精度世界矩阵
pub fn pose_to_dmat4(pose: &Pose) -> DMat4 {
    let (position, rotation) = from_pose(pose);
    DMat4::from_rotation_translation(rotation.as_dquat(), position)
}

/// 计算世界空间点在某个刚体局部空间中的坐标系
pub fn local_frame(body_pose: &Pose, world_point: DVec3) -> Pose {
    let body = pose_to_mat4(body_pose);
    let point = Mat4::from_translation(world_point.as_vec3());
    mat4_to_pose(body.inverse() * point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_round_trip() {
        let rotation = Quat::from_rotation_y(0.5);
        let pose = to_pose(DVec3::new(1.0, 2.0, 3.0), rotation);
        let (position, back) = from_pose(&pose);
        assert!((position - DVec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
        assert!(back.angle_between(rotation) < 1e-4);
    }

    #[test]
    fn test_local_frame_of_translated_body() {
        let body = to_pose(DVec3::new(0.0, 5.0, 0.0), Quat::IDENTITY);
        let frame = local_frame(&body, DVec3::new(0.0, 6.0, 0.0));
        let (position, _) = from_pose(&frame);
        assert!((position - DVec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
    }
}
